//! Retires channels flagged `close_on_release`.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_nio_core::{NioResult, Promise};
use tracing::debug;

use super::{ChannelPool, PoolMetrics, SharedPool};
use crate::channel::Channel;

/// Closes a channel on release when its `close_on_release` attribute is set,
/// before handing it to the delegate.
#[derive(Debug)]
pub struct CloseOnReleaseChannelPool {
    delegate: SharedPool,
}

impl CloseOnReleaseChannelPool {
    /// Wrap `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool) -> Self {
        Self { delegate }
    }
}

impl ChannelPool for CloseOnReleaseChannelPool {
    fn acquire_with(&self, promise: Promise<Channel>) {
        self.delegate.acquire_with(promise);
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let delegate = Arc::clone(&self.delegate);
        async move {
            if channel.attributes().close_on_release() {
                debug!(channel = %channel, "closing channel flagged close-on-release");
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
