//! Idle connection accounting.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustack_nio_core::{NioResult, Promise};
use tracing::trace;

use super::{ChannelPool, PoolMetrics, SharedPool, await_delegate, complete};
use crate::channel::{Channel, ChannelId};

/// Counts channels that are open and sitting in the pool unused.
///
/// A channel becomes idle when it is released while active and stops being
/// idle when it is acquired again or closes. Channels still flagged
/// `in_use` are never counted.
pub struct IdleConnectionCountingChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    delegate: SharedPool,
    idle: Mutex<HashMap<ChannelId, Channel>>,
    watched: Mutex<HashSet<ChannelId>>,
}

impl fmt::Debug for IdleConnectionCountingChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleConnectionCountingChannelPool")
            .field("idle", &self.count())
            .field("delegate", &self.inner.delegate)
            .finish()
    }
}

impl IdleConnectionCountingChannelPool {
    /// Count idle channels of `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegate,
                idle: Mutex::new(HashMap::new()),
                watched: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Number of idle, open channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.count()
    }
}

impl Inner {
    fn count(&self) -> usize {
        self.idle
            .lock()
            .values()
            .filter(|c| c.is_active() && !c.attributes().in_use())
            .count()
    }

    /// Forget `channel` once it closes, watching each channel only once.
    fn watch(self: &Arc<Self>, channel: &Channel) {
        if !self.watched.lock().insert(channel.id()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let watched = channel.downgrade();
        let id = channel.id();
        channel.event_loop().spawn(async move {
            if let Some(channel) = watched.upgrade() {
                channel.closed().await;
            }
            if let Some(inner) = weak.upgrade() {
                inner.idle.lock().remove(&id);
                inner.watched.lock().remove(&id);
                trace!(channel = %id, idle = inner.count(), "idle channel closed");
            }
        });
    }
}

impl ChannelPool for IdleConnectionCountingChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let acquiring = inner.delegate.acquire();
            match await_delegate(&mut promise, &inner.delegate, acquiring).await {
                None => {}
                Some(Ok(channel)) => {
                    inner.idle.lock().remove(&channel.id());
                    inner.watch(&channel);
                    trace!(channel = %channel, idle = inner.count(), "channel acquired");
                    complete(promise, &inner.delegate, channel).await;
                }
                Some(Err(error)) => {
                    promise.try_failure(error);
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let inner = Arc::clone(&self.inner);
        async move {
            // Must precede the delegate release: once the delegate has the
            // channel back it can be acquired again.
            let id = channel.id();
            if channel.is_active() {
                inner.idle.lock().insert(id, channel.clone());
                inner.watch(&channel);
            }
            let result = inner.delegate.release(channel.clone()).await;
            if result.is_err() || !channel.is_active() {
                inner.idle.lock().remove(&id);
            } else {
                trace!(channel = %channel, idle = inner.count(), "channel is now idle");
            }
            result
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.delegate.close().await;
            inner.idle.lock().clear();
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.inner.delegate.is_closed()
    }

    fn collect_metrics(&self, metrics: &mut PoolMetrics) {
        self.inner.delegate.collect_metrics(metrics);
    }
}
