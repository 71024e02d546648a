//! Base pool of physical connections to one endpoint.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustack_nio_core::{EventLoop, NioError, NioResult, Promise};
use tracing::{debug, trace};

use super::{ChannelPool, ChannelPoolHandler, PoolMetrics};
use crate::bootstrap::Bootstrap;
use crate::channel::{Channel, ChannelId};

/// Physical connection pool: reuses the most recently released channel
/// first and connects a new one when none is idle.
///
/// New sockets are handed to the [`ChannelPoolHandler`], if any, before
/// they are returned. Channels released while inactive are dropped.
pub struct SimpleChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    bootstrap: Bootstrap,
    handler: Option<Arc<dyn ChannelPoolHandler>>,
    event_loop: EventLoop,
    idle: Mutex<VecDeque<Channel>>,
    live: DashMap<ChannelId, Channel>,
    closed: AtomicBool,
}

impl fmt::Debug for SimpleChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleChannelPool")
            .field("remote", &self.inner.bootstrap.remote())
            .field("idle", &self.inner.idle.lock().len())
            .field("live", &self.inner.live.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SimpleChannelPool {
    /// Create a pool connecting through `bootstrap`.
    #[must_use]
    pub fn new(
        bootstrap: Bootstrap,
        handler: Option<Arc<dyn ChannelPoolHandler>>,
        event_loop: EventLoop,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bootstrap,
                handler,
                event_loop,
                idle: Mutex::new(VecDeque::new()),
                live: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of open channels owned by this pool.
    #[must_use]
    pub fn live_channels(&self) -> usize {
        self.inner.live.len()
    }
}

impl Inner {
    fn poll_idle(&self) -> Option<Channel> {
        let mut idle = self.idle.lock();
        while let Some(channel) = idle.pop_back() {
            if channel.is_active() {
                return Some(channel);
            }
            trace!(channel = %channel, "discarding inactive idle channel");
            self.live.remove(&channel.id());
        }
        None
    }

    async fn connect(self: &Arc<Self>) -> NioResult<Channel> {
        let channel = self.bootstrap.connect().await?;
        self.live.insert(channel.id(), channel.clone());

        let weak = Arc::downgrade(self);
        let watched = channel.downgrade();
        let id = channel.id();
        channel.event_loop().spawn(async move {
            if let Some(channel) = watched.upgrade() {
                channel.closed().await;
            }
            if let Some(pool) = weak.upgrade() {
                pool.live.remove(&id);
            }
        });

        if let Some(handler) = &self.handler {
            handler.channel_created(&channel);
        }
        Ok(channel)
    }

    async fn acquire(self: &Arc<Self>) -> NioResult<Channel> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NioError::PoolClosed);
        }
        if let Some(channel) = self.poll_idle() {
            trace!(channel = %channel, "reusing idle channel");
            return Ok(channel);
        }
        self.connect().await
    }
}

impl ChannelPool for SimpleChannelPool {
    fn acquire_with(&self, promise: Promise<Channel>) {
        let inner = Arc::clone(&self.inner);
        self.inner.event_loop.spawn(async move {
            match inner.acquire().await {
                Ok(channel) => {
                    if let Err(channel) = promise.try_success(channel) {
                        debug!(channel = %channel, "acquire cancelled, closing new channel");
                        channel.close();
                        inner.live.remove(&channel.id());
                    }
                }
                Err(error) => {
                    promise.try_failure(error);
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let inner = &self.inner;
        if !channel.is_active() {
            trace!(channel = %channel, "released inactive channel");
            channel.close();
            inner.live.remove(&channel.id());
        } else if inner.closed.load(Ordering::Acquire) {
            channel.close();
            inner.live.remove(&channel.id());
        } else {
            let mut idle = inner.idle.lock();
            if !idle.iter().any(|c| c.id() == channel.id()) {
                idle.push_back(channel);
            }
        }
        futures::future::ready(Ok(())).boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(remote = %self.inner.bootstrap.remote(), "closing simple channel pool");
            self.inner.idle.lock().clear();
            let live: Vec<Channel> = self.inner.live.iter().map(|e| e.value().clone()).collect();
            self.inner.live.clear();
            for channel in live {
                channel.close();
            }
        }
        futures::future::ready(()).boxed()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn collect_metrics(&self, metrics: &mut PoolMetrics) {
        metrics.idle_connections = self
            .inner
            .idle
            .lock()
            .iter()
            .filter(|c| c.is_active())
            .count();
    }
}
