//! The asynchronous HTTP client.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::{Request, Response, Uri};
use rustack_nio_core::{
    EventLoopGroup, NioConfig, NioError, NioResult, SharedEventLoopGroup, SharedEventLoopGroupRef,
};
use tracing::{debug, info};

use crate::executor::{ExecuteFuture, RequestContext, RequestExecutor};
use crate::pool::{ChannelPool, PoolMetrics, SharedPool};
use crate::pool_map::{ChannelPoolMap, PoolKey};
use crate::request::{AsyncExecuteRequest, RequestBody};
use crate::response::BufferingResponseHandler;

/// Where the client's event loops come from, which decides what closing the
/// client does to them.
pub enum EventLoopGroupSource {
    /// Created by and exclusive to the client; shut down on close.
    Owned(EventLoopGroup),
    /// A reference to a shared group; released on close.
    Shared(SharedEventLoopGroupRef),
    /// Supplied by the caller; left running on close.
    Borrowed(EventLoopGroup),
}

impl fmt::Debug for EventLoopGroupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(group) => f.debug_tuple("Owned").field(group).finish(),
            Self::Shared(group) => f.debug_tuple("Shared").field(group).finish(),
            Self::Borrowed(group) => f.debug_tuple("Borrowed").field(group).finish(),
        }
    }
}

impl EventLoopGroupSource {
    fn group(&self) -> &EventLoopGroup {
        match self {
            Self::Owned(group) | Self::Borrowed(group) => group,
            Self::Shared(group) => group.group(),
        }
    }

    fn close(&self) {
        match self {
            Self::Owned(group) => group.shutdown_gracefully(),
            Self::Shared(group) => group.release(),
            Self::Borrowed(_) => {}
        }
    }
}

/// Pooled HTTP/1.1 and HTTP/2 client.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> rustack_nio_core::NioResult<()> {
/// use rustack_nio_client::{NioAsyncHttpClient, RequestBody};
///
/// let client = NioAsyncHttpClient::builder().build()?;
/// let request = http::Request::get("http://localhost:8080/health")
///     .body(RequestBody::empty())
///     .unwrap();
/// let response = client.execute_buffered(request).await?;
/// println!("{}", response.status());
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct NioAsyncHttpClient {
    config: Arc<NioConfig>,
    group: EventLoopGroupSource,
    pools: ChannelPoolMap,
    closed: AtomicBool,
}

impl fmt::Debug for NioAsyncHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NioAsyncHttpClient")
            .field("group", &self.group)
            .field("pools", &self.pools)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`NioAsyncHttpClient`].
#[derive(Debug, Default)]
pub struct NioAsyncHttpClientBuilder {
    config: Option<NioConfig>,
    group: Option<EventLoopGroupSource>,
}

impl NioAsyncHttpClientBuilder {
    /// Use `config` instead of [`NioConfig::default`].
    #[must_use]
    pub fn config(mut self, config: NioConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Run on a caller-owned group, which the client never shuts down.
    #[must_use]
    pub fn event_loop_group(mut self, group: EventLoopGroup) -> Self {
        self.group = Some(EventLoopGroupSource::Borrowed(group));
        self
    }

    /// Run on a reference to a shared group, released when the client closes.
    pub fn shared_event_loop_group(mut self, shared: &Arc<SharedEventLoopGroup>) -> NioResult<Self> {
        self.group = Some(EventLoopGroupSource::Shared(shared.acquire()?));
        Ok(self)
    }

    /// Build the client. Without an explicit group, one with
    /// `event_loop_threads` threads is created and owned by the client.
    pub fn build(self) -> NioResult<NioAsyncHttpClient> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let group = match self.group {
            Some(group) => group,
            None => EventLoopGroupSource::Owned(EventLoopGroup::new(config.event_loop_threads)?),
        };
        let config = Arc::new(config);
        let pools = match ChannelPoolMap::new(Arc::clone(&config), group.group().clone()) {
            Ok(pools) => pools,
            Err(error) => {
                group.close();
                return Err(error);
            }
        };
        info!(
            protocol = %config.protocol,
            max_connections = config.max_connections,
            threads = group.group().loops().len(),
            "created async HTTP client"
        );
        Ok(NioAsyncHttpClient {
            config,
            group,
            pools,
            closed: AtomicBool::new(false),
        })
    }
}

impl NioAsyncHttpClient {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> NioAsyncHttpClientBuilder {
        NioAsyncHttpClientBuilder::default()
    }

    /// Transport configuration.
    #[must_use]
    pub fn config(&self) -> &NioConfig {
        &self.config
    }

    /// Execute a request, streaming the response to its handler.
    pub fn execute(&self, request: AsyncExecuteRequest) -> ExecuteFuture {
        if self.closed.load(Ordering::Acquire) {
            return ExecuteFuture::failed(NioError::PoolClosed);
        }
        let pool = match self.pools.get(request.request.uri()) {
            Ok(pool) => pool as SharedPool,
            Err(error) => {
                request.handler.on_error(&error);
                return ExecuteFuture::failed(error);
            }
        };
        let context = RequestContext::new(
            pool,
            self.group.group().clone(),
            request.request.method().clone(),
            request.request.uri().clone(),
            request.handler,
            Arc::clone(&self.config),
        )
        .with_full_duplex(request.full_duplex);
        RequestExecutor::new(Arc::new(context)).execute(request.request)
    }

    /// Execute a request and collect the whole response in memory.
    pub async fn execute_buffered(&self, request: Request<RequestBody>) -> NioResult<Response<Bytes>> {
        let (handler, rx) = BufferingResponseHandler::new();
        self.execute(AsyncExecuteRequest::new(request, handler)).await?;
        rx.await
            .map_err(|_| NioError::Internal("response was not delivered".to_owned()))?
    }

    /// Number of open connections sitting idle across all endpoints.
    #[must_use]
    pub fn idle_connection_count(&self) -> usize {
        self.pools.pools().iter().map(|(_, pool)| pool.count()).sum()
    }

    /// Concurrency figures of the pool serving `uri`, if it exists.
    #[must_use]
    pub fn pool_metrics(&self, uri: &Uri) -> Option<PoolMetrics> {
        let key = PoolKey::from_uri(uri).ok()?;
        let (_, pool) = self.pools.pools().into_iter().find(|(k, _)| *k == key)?;
        let mut metrics = PoolMetrics::default();
        pool.collect_metrics(&mut metrics);
        Some(metrics)
    }

    /// Close every pool and connection, then release the event loops as
    /// their ownership dictates. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing async HTTP client");
        self.pools.close().await;
        self.group.close();
    }
}
