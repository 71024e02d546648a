//! Per-endpoint pool registry.
//!
//! Pools are keyed by scheme, host, and port and assembled on first use
//! with the full decorator stack (see [`crate::pool`]). Whether an endpoint
//! goes through the configured proxy is decided once per key.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use http::Uri;
use http::uri::Scheme;
use rustack_nio_core::{EventLoopGroup, NioConfig, NioError, NioResult, ProxyConfig};
use tracing::debug;

use crate::bootstrap::BootstrapProvider;
use crate::pipeline::ChannelPipelineInitializer;
use crate::pool::{
    CancellableAcquireChannelPool, ChannelPool, ChannelPoolHandler, CloseOnReleaseChannelPool,
    HandlerRemovingListener, HealthCheckedChannelPool, HttpOrHttp2ChannelPool,
    IdleConnectionCountingChannelPool, InUseTrackingListener, ListenerInvokingChannelPool,
    SharedPool, SimpleChannelPool, TlsHandshakeChannelPool, TunnelChannelPool,
};
use crate::proxy::ProxyTunnelInitHandler;
use crate::tls::TlsContext;

/// Endpoint identity of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Whether the endpoint is reached over TLS.
    pub secure: bool,
    /// Lower-cased host name.
    pub host: String,
    /// Port, defaulted from the scheme.
    pub port: u16,
}

impl PoolKey {
    /// Key of the endpoint `uri` targets.
    pub fn from_uri(uri: &Uri) -> NioResult<Self> {
        let secure = match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTPS => true,
            Some(scheme) if *scheme == Scheme::HTTP => false,
            Some(scheme) => {
                return Err(NioError::InvalidRequest(format!(
                    "unsupported scheme {scheme} in {uri}"
                )));
            }
            None => {
                return Err(NioError::InvalidRequest(format!(
                    "request URI {uri} has no scheme"
                )));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| NioError::InvalidRequest(format!("request URI {uri} has no host")))?;
        Ok(Self {
            secure,
            host: host.to_ascii_lowercase(),
            port: uri.port_u16().unwrap_or(if secure { 443 } else { 80 }),
        })
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Lazily built pools, one per endpoint.
pub struct ChannelPoolMap {
    config: Arc<NioConfig>,
    group: EventLoopGroup,
    bootstraps: BootstrapProvider,
    tls: TlsContext,
    pools: DashMap<PoolKey, Arc<IdleConnectionCountingChannelPool>>,
    proxied: DashMap<PoolKey, bool>,
    closed: AtomicBool,
}

impl fmt::Debug for ChannelPoolMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPoolMap")
            .field("pools", &self.pools.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChannelPoolMap {
    /// Create an empty map connecting through `group`.
    pub fn new(config: Arc<NioConfig>, group: EventLoopGroup) -> NioResult<Self> {
        let tls = TlsContext::new(&config)?;
        let bootstraps = BootstrapProvider::new(group.clone(), config.connect_timeout);
        Ok(Self {
            config,
            group,
            bootstraps,
            tls,
            pools: DashMap::new(),
            proxied: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Pool for the endpoint `uri` targets, created on first use.
    pub fn get(&self, uri: &Uri) -> NioResult<Arc<IdleConnectionCountingChannelPool>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NioError::PoolClosed);
        }
        let key = PoolKey::from_uri(uri)?;
        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(pool.value()));
        }
        let pool = self
            .pools
            .entry(key.clone())
            .or_try_insert_with(|| self.new_pool(&key))?;
        Ok(Arc::clone(pool.value()))
    }

    /// Every pool created so far.
    #[must_use]
    pub fn pools(&self) -> Vec<(PoolKey, Arc<IdleConnectionCountingChannelPool>)> {
        self.pools
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close every pool and the channels they own. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<_> = self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        self.pools.clear();
        debug!(pools = pools.len(), "closing channel pools");
        for pool in pools {
            pool.close().await;
        }
    }

    /// The proxy `key` is reached through, if any.
    fn proxy_for(&self, key: &PoolKey) -> Option<&ProxyConfig> {
        let proxy = self.config.proxy.as_ref()?;
        let proxied = *self
            .proxied
            .entry(key.clone())
            .or_insert_with(|| !proxy.is_non_proxy_host(&key.host));
        proxied.then_some(proxy)
    }

    fn new_pool(&self, key: &PoolKey) -> NioResult<Arc<IdleConnectionCountingChannelPool>> {
        let initializer = Arc::new(ChannelPipelineInitializer::new(
            Arc::clone(&self.config),
            key.secure.then(|| self.tls.clone()),
            key.host.clone(),
        ));
        let proxy = self.proxy_for(key);
        debug!(endpoint = %key, proxy = ?proxy.map(ProxyConfig::authority), "creating channel pool");

        let mut pool: SharedPool = match proxy {
            Some(proxy) => {
                let simple = SimpleChannelPool::new(
                    self.bootstraps.create_bootstrap(&proxy.host, proxy.port),
                    None,
                    self.group.next(),
                );
                Arc::new(TunnelChannelPool::new(
                    Arc::new(simple),
                    ProxyTunnelInitHandler::new(
                        proxy.clone(),
                        key.host.clone(),
                        key.port,
                        self.config.connect_timeout,
                    ),
                    initializer,
                ))
            }
            None => Arc::new(SimpleChannelPool::new(
                self.bootstraps.create_bootstrap(&key.host, key.port),
                Some(initializer as Arc<dyn ChannelPoolHandler>),
                self.group.next(),
            )),
        };
        pool = Arc::new(TlsHandshakeChannelPool::new(pool));
        pool = Arc::new(CloseOnReleaseChannelPool::new(pool));
        pool = Arc::new(HttpOrHttp2ChannelPool::new(pool, &self.config));
        pool = Arc::new(HealthCheckedChannelPool::new(
            pool,
            self.config.connection_acquisition_timeout,
        ));
        pool = Arc::new(ListenerInvokingChannelPool::new(
            pool,
            vec![
                Arc::new(InUseTrackingListener),
                Arc::new(HandlerRemovingListener),
            ],
        ));
        pool = Arc::new(CancellableAcquireChannelPool::new(pool));
        Ok(Arc::new(IdleConnectionCountingChannelPool::new(pool)))
    }
}
