//! Outermost cancellation guard.

use std::sync::Arc;

use futures::future::BoxFuture;
use rustack_nio_core::{NioResult, Promise};

use super::{ChannelPool, PoolMetrics, SharedPool, await_delegate, complete};
use crate::channel::Channel;

/// Makes sure a channel acquired for a caller that has since cancelled is
/// closed and released rather than leaked.
#[derive(Debug)]
pub struct CancellableAcquireChannelPool {
    delegate: SharedPool,
}

impl CancellableAcquireChannelPool {
    /// Guard `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool) -> Self {
        Self { delegate }
    }
}

impl ChannelPool for CancellableAcquireChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let delegate = Arc::clone(&self.delegate);
        tokio::spawn(async move {
            let acquiring = delegate.acquire();
            match await_delegate(&mut promise, &delegate, acquiring).await {
                None => {}
                Some(Ok(channel)) => complete(promise, &delegate, channel).await,
                Some(Err(error)) => {
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
