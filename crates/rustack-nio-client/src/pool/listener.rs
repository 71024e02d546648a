//! Acquire/release listeners.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_nio_core::{NioResult, Promise};

use super::{ChannelPool, PoolMetrics, SharedPool, await_delegate, close_and_release};
use crate::channel::{Channel, handlers};

/// Observer of channels leaving and re-entering a pool.
pub trait ChannelPoolListener: Send + Sync + fmt::Debug {
    /// A channel is about to be handed to a caller.
    fn channel_acquired(&self, _channel: &Channel) {}

    /// A channel is about to be returned to the delegate.
    fn channel_released(&self, _channel: &Channel) {}
}

/// Keeps the `in_use` attribute in step with leases.
#[derive(Debug, Default, Clone, Copy)]
pub struct InUseTrackingListener;

impl ChannelPoolListener for InUseTrackingListener {
    fn channel_acquired(&self, channel: &Channel) {
        channel.attributes().set_in_use(true);
    }

    fn channel_released(&self, channel: &Channel) {
        channel.attributes().set_in_use(false);
    }
}

/// Strips per-exchange handlers from a channel being returned, so the next
/// exchange starts from a clean pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandlerRemovingListener;

impl ChannelPoolListener for HandlerRemovingListener {
    fn channel_released(&self, channel: &Channel) {
        if channel.is_active() {
            for name in handlers::PER_EXCHANGE {
                channel.pipeline().remove(name);
            }
        }
        channel.unbind_exchange();
    }
}

/// Invokes listeners around the delegate's acquire and release.
///
/// Acquire listeners run in order; release listeners run in reverse order.
pub struct ListenerInvokingChannelPool {
    delegate: SharedPool,
    listeners: Arc<[Arc<dyn ChannelPoolListener>]>,
}

impl fmt::Debug for ListenerInvokingChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerInvokingChannelPool")
            .field("listeners", &self.listeners)
            .field("delegate", &self.delegate)
            .finish()
    }
}

impl ListenerInvokingChannelPool {
    /// Wrap `delegate` with `listeners`.
    #[must_use]
    pub fn new(delegate: SharedPool, listeners: Vec<Arc<dyn ChannelPoolListener>>) -> Self {
        Self {
            delegate,
            listeners: listeners.into(),
        }
    }
}

fn notify_released(listeners: &[Arc<dyn ChannelPoolListener>], channel: &Channel) {
    for listener in listeners.iter().rev() {
        listener.channel_released(channel);
    }
}

impl ChannelPool for ListenerInvokingChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let delegate = Arc::clone(&self.delegate);
        let listeners = Arc::clone(&self.listeners);
        tokio::spawn(async move {
            let acquiring = delegate.acquire();
            match await_delegate(&mut promise, &delegate, acquiring).await {
                None => {}
                Some(Err(error)) => {
                    promise.try_failure(error);
                }
                Some(Ok(channel)) => {
                    for listener in listeners.iter() {
                        listener.channel_acquired(&channel);
                    }
                    if let Err(channel) = promise.try_success(channel) {
                        notify_released(&listeners, &channel);
                        close_and_release(&delegate, channel).await;
                    }
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let delegate = Arc::clone(&self.delegate);
        let listeners = Arc::clone(&self.listeners);
        async move {
            notify_released(&listeners, &channel);
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
