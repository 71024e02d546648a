//! HTTP/2 stream multiplexing.
//!
//! Each physical connection leased from the delegate is a *parent*; callers
//! get *child* stream channels allocated on a parent with spare stream
//! capacity. A parent never gets new streams once it is inactive, has
//! received a GOAWAY, or is flagged `close_on_release`. Such a parent is
//! closed and given back to the delegate as soon as its last stream is
//! released.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustack_nio_core::{NioError, NioResult, Promise};
use tracing::{debug, trace};

use super::{ChannelPool, PoolMetrics, SharedPool, close_and_release};
use crate::channel::{Channel, ChannelId};

struct ParentRecord {
    parent: Channel,
    open_streams: Mutex<u32>,
}

impl ParentRecord {
    fn accepts_streams(&self) -> bool {
        self.parent.is_active()
            && self.parent.go_away().is_none()
            && !self.parent.attributes().close_on_release()
    }
}

/// Multiplexes callers onto HTTP/2 connections, up to `max_streams` open
/// streams per connection.
pub struct Http2MultiplexedChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    delegate: SharedPool,
    max_streams: u32,
    parents: Mutex<Vec<Arc<ParentRecord>>>,
    children: DashMap<ChannelId, Arc<ParentRecord>>,
    connect_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl fmt::Debug for Http2MultiplexedChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2MultiplexedChannelPool")
            .field("max_streams", &self.inner.max_streams)
            .field("connections", &self.inner.parents.lock().len())
            .field("streams", &self.inner.children.len())
            .field("delegate", &self.inner.delegate)
            .finish()
    }
}

impl Http2MultiplexedChannelPool {
    /// Multiplex over connections from `delegate`.
    #[must_use]
    pub fn new(delegate: SharedPool, max_streams: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegate,
                max_streams: max_streams.max(1),
                parents: Mutex::new(Vec::new()),
                children: DashMap::new(),
                connect_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of connections currently multiplexed.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.parents.lock().len()
    }
}

impl Inner {
    fn open_stream_on(&self, record: &Arc<ParentRecord>) -> Option<Channel> {
        let mut open = record.open_streams.lock();
        if *open >= self.max_streams || !record.accepts_streams() {
            return None;
        }
        let child = Channel::new_stream(&record.parent).ok()?;
        *open += 1;
        if *open == 1 {
            record.parent.attributes().set_in_use(true);
        }
        self.children.insert(child.id(), Arc::clone(record));
        trace!(parent = %record.parent, child = %child, streams = *open, "opened stream");
        Some(child)
    }

    fn try_open_stream(&self) -> Option<Channel> {
        let parents: Vec<_> = self.parents.lock().clone();
        parents.iter().find_map(|record| self.open_stream_on(record))
    }

    fn has_capacity(&self) -> bool {
        self.parents
            .lock()
            .iter()
            .any(|r| r.accepts_streams() && *r.open_streams.lock() < self.max_streams)
    }

    async fn acquire(self: &Arc<Self>) -> NioResult<Channel> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NioError::PoolClosed);
        }
        if let Some(child) = self.try_open_stream() {
            return Ok(child);
        }
        // The connect task is detached so that a cancelled caller cannot
        // strand a half-initialized connection.
        let inner = Arc::clone(self);
        let connected = tokio::spawn(async move { inner.connect_parent().await })
            .await
            .map_err(|e| NioError::Internal(format!("HTTP/2 connect task failed: {e}")))??;
        match connected {
            Some(record) => self
                .open_stream_on(&record)
                .ok_or_else(|| record.parent.closed_error()),
            None => self
                .try_open_stream()
                .ok_or_else(|| NioError::io_message("no HTTP/2 connection accepted a new stream")),
        }
    }

    /// Lease and register a new connection, unless another caller already
    /// made capacity available while this one waited for the lock.
    async fn connect_parent(self: Arc<Self>) -> NioResult<Option<Arc<ParentRecord>>> {
        let _guard = self.connect_lock.lock().await;
        if self.has_capacity() {
            return Ok(None);
        }
        let parent = self.delegate.acquire().await?;
        if let Err(error) = parent.protocol().await {
            close_and_release(&self.delegate, parent).await;
            return Err(error);
        }
        if self.closed.load(Ordering::Acquire) {
            close_and_release(&self.delegate, parent).await;
            return Err(NioError::PoolClosed);
        }

        let record = Arc::new(ParentRecord {
            parent: parent.clone(),
            open_streams: Mutex::new(0),
        });
        self.parents.lock().push(Arc::clone(&record));
        debug!(parent = %parent, "registered HTTP/2 connection");

        let weak: Weak<Self> = Arc::downgrade(&self);
        let watched = Arc::clone(&record);
        parent.event_loop().spawn(async move {
            tokio::select! {
                () = watched.parent.closed() => {}
                _ = watched.parent.attributes().go_away_received() => {
                    debug!(parent = %watched.parent, "GOAWAY received, retiring connection");
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.retire_if_drained(&watched).await;
            }
        });
        Ok(Some(record))
    }

    async fn retire_if_drained(&self, record: &Arc<ParentRecord>) {
        if *record.open_streams.lock() > 0 || record.accepts_streams() {
            return;
        }
        let removed = {
            let mut parents = self.parents.lock();
            let before = parents.len();
            parents.retain(|r| !Arc::ptr_eq(r, record));
            parents.len() != before
        };
        if removed {
            debug!(parent = %record.parent, "closing drained HTTP/2 connection");
            close_and_release(&self.delegate, record.parent.clone()).await;
        }
    }

    async fn release_stream(&self, child: Channel) -> NioResult<()> {
        child.close();
        let Some((_, record)) = self.children.remove(&child.id()) else {
            return Ok(());
        };
        let drained = {
            let mut open = record.open_streams.lock();
            *open = open.saturating_sub(1);
            *open == 0
        };
        if drained {
            record.parent.attributes().set_in_use(false);
            self.retire_if_drained(&record).await;
        }
        Ok(())
    }
}

impl ChannelPool for Http2MultiplexedChannelPool {
    fn acquire_with(&self, mut promise: Promise<Channel>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let acquired = tokio::select! {
                biased;
                () = promise.cancelled() => return,
                acquired = inner.acquire() => acquired,
            };
            match acquired {
                Ok(child) => {
                    if let Err(child) = promise.try_success(child) {
                        let _ = inner.release_stream(child).await;
                    }
                }
                Err(error) => {
                    promise.try_failure(error);
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        let inner = Arc::clone(&self.inner);
        async move { inner.release_stream(channel).await }.boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            if !inner.closed.swap(true, Ordering::AcqRel) {
                let parents = std::mem::take(&mut *inner.parents.lock());
                inner.children.clear();
                for record in parents {
                    close_and_release(&inner.delegate, record.parent.clone()).await;
                }
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
        metrics.idle_connections = self
            .inner
            .parents
            .lock()
            .iter()
            .filter(|r| r.parent.is_active() && *r.open_streams.lock() == 0)
            .count();
    }
}
