//! Health-checked pool stage.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_nio_core::{NioError, NioResult, Promise, PromiseFuture};
use tokio::time::Instant;
use tracing::debug;

use super::{ChannelPool, PoolMetrics, SharedPool, close_and_release, complete};
use crate::channel::Channel;

/// Only hands out channels that are open and whose last response allowed
/// keep-alive.
///
/// Unhealthy channels are closed, released, and replaced until a healthy
/// one is found or the acquire timeout elapses.
#[derive(Debug)]
pub struct HealthCheckedChannelPool {
    delegate: SharedPool,
    acquire_timeout: Duration,
}

impl HealthCheckedChannelPool {
    /// Health-check channels from `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool, acquire_timeout: Duration) -> Self {
        Self {
            delegate,
            acquire_timeout,
        }
    }
}

fn is_healthy(channel: &Channel) -> bool {
    channel.is_active() && channel.attributes().keep_alive() != Some(false)
}

/// Stop waiting on `acquiring`. A channel the delegate delivered in the
/// meantime is closed and released.
async fn abandon(delegate: &SharedPool, acquiring: PromiseFuture<Channel>) {
    if let Some(channel) = acquiring.cancel() {
        debug!(channel = %channel, "channel delivered after acquire was abandoned");
        close_and_release(delegate, channel).await;
    }
}

impl ChannelPool for HealthCheckedChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let delegate = Arc::clone(&self.delegate);
        let timeout = self.acquire_timeout;
        tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            loop {
                let mut acquiring = delegate.acquire();
                let acquired = tokio::select! {
                    biased;
                    result = &mut acquiring => result,
                    () = promise.cancelled() => {
                        abandon(&delegate, acquiring).await;
                        return;
                    }
                    () = tokio::time::sleep_until(deadline) => {
                        abandon(&delegate, acquiring).await;
                        promise.try_failure(NioError::AcquireTimeout { timeout });
                        return;
                    }
                };
                let channel = match acquired {
                    Ok(channel) => channel,
                    Err(error) => {
                        promise.try_failure(error);
                        return;
                    }
                };
                if is_healthy(&channel) {
                    complete(promise, &delegate, channel).await;
                    return;
                }
                debug!(channel = %channel, "discarding unhealthy channel");
                close_and_release(&delegate, channel).await;
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let delegate = Arc::clone(&self.delegate);
        async move {
            if !is_healthy(&channel) {
                channel.close();
            }
            delegate.release(channel).await
        }
        .boxed()
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
