//! Proxy tunnel stage.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustack_nio_core::{NioResult, Promise};
use tracing::debug;

use super::{
    ChannelPool, ChannelPoolHandler, PoolMetrics, SharedPool, await_delegate, close_and_release,
    complete,
};
use crate::channel::Channel;
use crate::proxy::ProxyTunnelInitHandler;

/// Establishes a CONNECT tunnel on channels connected to a proxy, then runs
/// the pipeline initializer on the tunneled channel.
///
/// Channels coming back from the delegate with a tunnel already in place
/// are handed out untouched.
pub struct TunnelChannelPool {
    delegate: SharedPool,
    tunnel: Arc<ProxyTunnelInitHandler>,
    initializer: Arc<dyn ChannelPoolHandler>,
}

impl fmt::Debug for TunnelChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelChannelPool")
            .field("tunnel", &self.tunnel)
            .field("delegate", &self.delegate)
            .finish_non_exhaustive()
    }
}

impl TunnelChannelPool {
    /// Tunnel channels from `delegate`, initializing them with `initializer`.
    #[must_use]
    pub fn new(
        delegate: SharedPool,
        tunnel: ProxyTunnelInitHandler,
        initializer: Arc<dyn ChannelPoolHandler>,
    ) -> Self {
        Self {
            delegate,
            tunnel: Arc::new(tunnel),
            initializer,
        }
    }
}

impl ChannelPool for TunnelChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let delegate = Arc::clone(&self.delegate);
        let tunnel = Arc::clone(&self.tunnel);
        let initializer = Arc::clone(&self.initializer);
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
            if channel.attributes().tunnel_established() {
                complete(promise, &delegate, channel).await;
                return;
            }

            let established = tokio::select! {
                biased;
                () = promise.cancelled() => None,
                result = tunnel.establish(&channel) => Some(result),
            };
            match established {
                None => close_and_release(&delegate, channel).await,
                Some(Ok(())) => {
                    initializer.channel_created(&channel);
                    complete(promise, &delegate, channel).await;
                }
                Some(Err(error)) => {
                    debug!(channel = %channel, %error, "failed to establish proxy tunnel");
                    close_and_release(&delegate, channel).await;
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
