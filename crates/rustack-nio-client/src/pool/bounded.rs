//! Lease-bounded pool stage.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_nio_core::{NioError, NioResult, Promise};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use super::{ChannelPool, PoolMetrics, SharedPool, await_delegate, close_and_release};
use crate::channel::{Channel, ChannelId};

/// Caps concurrent leases at `max_connections` and queued acquisitions at
/// `max_pending`.
///
/// A caller that cannot get a lease within the acquire timeout fails with
/// [`NioError::AcquireTimeout`]; one arriving while the queue is full fails
/// immediately with [`NioError::PendingAcquiresExceeded`].
pub struct BoundedChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    delegate: SharedPool,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    max_pending: usize,
    acquire_timeout: Duration,
    pending: AtomicUsize,
    leases: DashMap<ChannelId, OwnedSemaphorePermit>,
    closed: AtomicBool,
}

impl fmt::Debug for BoundedChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannelPool")
            .field("max_connections", &self.inner.max_connections)
            .field("max_pending", &self.inner.max_pending)
            .field("leased", &self.inner.leases.len())
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("delegate", &self.inner.delegate)
            .finish()
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BoundedChannelPool {
    /// Bound `delegate`.
    #[must_use]
    pub fn new(
        delegate: SharedPool,
        max_connections: usize,
        max_pending: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegate,
                semaphore: Arc::new(Semaphore::new(max_connections)),
                max_connections,
                max_pending,
                acquire_timeout,
                pending: AtomicUsize::new(0),
                leases: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Inner {
    async fn lease(&self) -> NioResult<OwnedSemaphorePermit> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NioError::PoolClosed);
        }
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(NioError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        let _guard = PendingGuard(&self.pending);
        if pending > self.max_pending {
            return Err(NioError::PendingAcquiresExceeded {
                max: self.max_pending,
            });
        }
        trace!(pending, "waiting for a connection lease");
        match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(NioError::PoolClosed),
            Err(_) => Err(NioError::AcquireTimeout {
                timeout: self.acquire_timeout,
            }),
        }
    }
}

impl ChannelPool for BoundedChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let leased = tokio::select! {
                biased;
                () = promise.cancelled() => return,
                leased = inner.lease() => leased,
            };
            let permit = match leased {
                Ok(permit) => permit,
                Err(error) => {
                    debug!(%error, "connection lease refused");
                    promise.try_failure(error);
                    return;
                }
            };

            let acquiring = inner.delegate.acquire();
            match await_delegate(&mut promise, &inner.delegate, acquiring).await {
                None => drop(permit),
                Some(Err(error)) => {
                    drop(permit);
                    promise.try_failure(error);
                }
                Some(Ok(channel)) => {
                    inner.leases.insert(channel.id(), permit);
                    if let Err(channel) = promise.try_success(channel) {
                        inner.leases.remove(&channel.id());
                        close_and_release(&inner.delegate, channel).await;
                    }
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let inner = Arc::clone(&self.inner);
        async move {
            let id = channel.id();
            let result = inner.delegate.release(channel).await;
            inner.leases.remove(&id);
            result
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            if !inner.closed.swap(true, Ordering::AcqRel) {
                inner.semaphore.close();
                inner.leases.clear();
            }
            inner.delegate.close().await;
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn collect_metrics(&self, metrics: &mut PoolMetrics) {
        self.inner.delegate.collect_metrics(metrics);
        metrics.max_concurrency = self.inner.max_connections;
        metrics.available_concurrency = self.inner.semaphore.available_permits();
        metrics.leased_concurrency = self.inner.leases.len();
        metrics.pending_concurrency_acquires = self.inner.pending.load(Ordering::Acquire);
    }
}
