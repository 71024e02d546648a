//! TLS handshake gate.

use std::sync::Arc;

use futures::future::BoxFuture;
use rustack_nio_core::{NioError, NioResult, Promise};
use tracing::debug;

use super::{ChannelPool, PoolMetrics, SharedPool, await_delegate, close_and_release, complete};
use crate::channel::{Channel, handlers};

/// Holds back channels with a TLS session until their handshake succeeds.
///
/// A failed handshake closes and releases the channel and fails the
/// acquisition with [`NioError::Handshake`].
#[derive(Debug)]
pub struct TlsHandshakeChannelPool {
    delegate: SharedPool,
}

impl TlsHandshakeChannelPool {
    /// Gate `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool) -> Self {
        Self { delegate }
    }
}

impl ChannelPool for TlsHandshakeChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let delegate = Arc::clone(&self.delegate);
        tokio::spawn(async move {
            let acquiring = delegate.acquire();
            let channel = match await_delegate(&mut promise, &delegate, acquiring).await {
                None => return,
                Some(Err(error)) => {
                    promise.try_failure(error);
                    return;
                }
                Some(Ok(channel)) => channel,
            };
            if !channel.pipeline().contains(handlers::SSL) {
                complete(promise, &delegate, channel).await;
                return;
            }

            let handshake = tokio::select! {
                biased;
                () = promise.cancelled() => None,
                result = channel.handshake() => Some(result),
            };
            match handshake {
                None => close_and_release(&delegate, channel).await,
                Some(Ok(())) => complete(promise, &delegate, channel).await,
                Some(Err(error)) => {
                    debug!(channel = %channel, %error, "TLS handshake failed");
                    close_and_release(&delegate, channel).await;
                    let error = match error {
                        NioError::Handshake { .. } => error,
                        other => NioError::handshake(other),
                    };
                    promise.try_failure(error);
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        self.delegate.release(channel)
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        self.delegate.close()
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    fn collect_metrics(&self, metrics: &mut PoolMetrics) {
        self.delegate.collect_metrics(metrics);
    }
}
