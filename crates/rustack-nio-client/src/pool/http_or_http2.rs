//! Protocol-specific pool selection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_nio_core::{NioConfig, NioError, NioResult, Promise, Protocol};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{
    BoundedChannelPool, ChannelPool, Http2MultiplexedChannelPool, PoolMetrics, SharedPool,
    close_and_release,
};
use crate::channel::Channel;

/// Picks the pool shape on first use from the negotiated protocol.
///
/// The first acquisition connects a probe channel and waits for protocol
/// negotiation. HTTP/1.1 endpoints then get a [`BoundedChannelPool`] over
/// the delegate, HTTP/2 endpoints a [`BoundedChannelPool`] over an
/// [`Http2MultiplexedChannelPool`], so `max_connections` bounds concurrent
/// streams. The probe channel is released to the delegate for reuse.
pub struct HttpOrHttp2ChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    delegate: SharedPool,
    max_connections: usize,
    max_pending: usize,
    acquire_timeout: Duration,
    max_streams: u32,
    protocol_pool: OnceCell<(Protocol, SharedPool)>,
    closed: AtomicBool,
}

impl fmt::Debug for HttpOrHttp2ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOrHttp2ChannelPool")
            .field("protocol", &self.protocol())
            .field("max_connections", &self.inner.max_connections)
            .field("delegate", &self.inner.delegate)
            .finish()
    }
}

impl HttpOrHttp2ChannelPool {
    /// Select a pool over `delegate` sized by `config`.
    #[must_use]
    pub fn new(delegate: SharedPool, config: &NioConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegate,
                max_connections: config.max_connections,
                max_pending: config.max_pending_connection_acquires,
                acquire_timeout: config.connection_acquisition_timeout,
                max_streams: config.max_http2_streams,
                protocol_pool: OnceCell::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Protocol of the endpoint, once known.
    #[must_use]
    pub fn protocol(&self) -> Option<Protocol> {
        self.inner.protocol_pool.get().map(|(protocol, _)| *protocol)
    }
}

impl Inner {
    async fn protocol_pool(&self) -> NioResult<SharedPool> {
        let (_, pool) = self
            .protocol_pool
            .get_or_try_init(|| async {
                let protocol = self.probe().await?;
                debug!(%protocol, "selected pool for negotiated protocol");
                let base: SharedPool = match protocol {
                    Protocol::Http1_1 => Arc::clone(&self.delegate),
                    Protocol::Http2 => Arc::new(Http2MultiplexedChannelPool::new(
                        Arc::clone(&self.delegate),
                        self.max_streams,
                    )),
                };
                let pool: SharedPool = Arc::new(BoundedChannelPool::new(
                    base,
                    self.max_connections,
                    self.max_pending,
                    self.acquire_timeout,
                ));
                Ok::<_, NioError>((protocol, pool))
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    async fn probe(&self) -> NioResult<Protocol> {
        let channel = self.delegate.acquire().await?;
        match channel.protocol().await {
            Ok(protocol) => {
                self.delegate.release(channel).await?;
                Ok(protocol)
            }
            Err(error) => {
                close_and_release(&self.delegate, channel).await;
                Err(error)
            }
        }
    }
}

impl ChannelPool for HttpOrHttp2ChannelPool {
    fn acquire_with(&self, promise: Promise<Channel>) {
        if self.inner.closed.load(Ordering::Acquire) {
            promise.try_failure(NioError::PoolClosed);
            return;
        }
        if let Some((_, pool)) = self.inner.protocol_pool.get() {
            pool.acquire_with(promise);
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Not raced against cancellation: the probe must finish so its
            // channel is returned to the delegate.
            match inner.protocol_pool().await {
                Ok(pool) if !promise.is_cancelled() => pool.acquire_with(promise),
                Ok(_) => {}
                Err(error) => {
                    promise.try_failure(error);
                }
            }
        });
    }

    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>> {
        match self.inner.protocol_pool.get() {
            Some((_, pool)) => pool.release(channel),
            None => self.inner.delegate.release(channel),
        }
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.closed.store(true, Ordering::Release);
            match inner.protocol_pool.get() {
                Some((_, pool)) => pool.close().await,
                None => inner.delegate.close().await,
            }
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn collect_metrics(&self, metrics: &mut PoolMetrics) {
        match self.inner.protocol_pool.get() {
            Some((_, pool)) => pool.collect_metrics(metrics),
            None => {
                self.inner.delegate.collect_metrics(metrics);
                metrics.max_concurrency = self.inner.max_connections;
                metrics.available_concurrency = self.inner.max_connections;
            }
        }
    }
}
