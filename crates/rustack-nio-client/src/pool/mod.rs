//! Channel pools and their decorators.
//!
//! Every stage implements [`ChannelPool`] and wraps exactly one delegate. The
//! stack for one endpoint is assembled by [`crate::pool_map`] in a fixed
//! order, innermost first:
//!
//! 1. [`SimpleChannelPool`]: physical connections, LIFO reuse.
//! 2. [`TunnelChannelPool`]: proxy CONNECT tunnel (proxied endpoints only).
//! 3. [`TlsHandshakeChannelPool`]: waits for the TLS handshake.
//! 4. [`CloseOnReleaseChannelPool`]: honors `close_on_release`.
//! 5. [`HttpOrHttp2ChannelPool`]: protocol-specific bounded pool.
//! 6. [`HealthCheckedChannelPool`]: only hands out healthy channels.
//! 7. [`ListenerInvokingChannelPool`]: in-use tracking and handler cleanup.
//! 8. [`CancellableAcquireChannelPool`]: no leaks when callers give up.
//! 9. [`IdleConnectionCountingChannelPool`]: idle connection accounting.
//!
//! Acquisitions are expressed as [`Promise`]s. A caller that cancels its
//! [`PromiseFuture`] makes each stage stop waiting, and any channel produced
//! after the cancellation is closed and released instead of leaking.

mod bounded;
mod cancellable;
mod close_on_release;
mod health;
mod http2;
mod http_or_http2;
mod idle_counting;
mod listener;
mod simple;
mod tls;
mod tunnel;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustack_nio_core::{NioResult, Promise, PromiseFuture, promise};
use tracing::{debug, warn};

use crate::channel::Channel;

pub use bounded::BoundedChannelPool;
pub use cancellable::CancellableAcquireChannelPool;
pub use close_on_release::CloseOnReleaseChannelPool;
pub use health::HealthCheckedChannelPool;
pub use http_or_http2::HttpOrHttp2ChannelPool;
pub use http2::Http2MultiplexedChannelPool;
pub use idle_counting::IdleConnectionCountingChannelPool;
pub use listener::{
    ChannelPoolListener, HandlerRemovingListener, InUseTrackingListener,
    ListenerInvokingChannelPool,
};
pub use simple::SimpleChannelPool;
pub use tls::TlsHandshakeChannelPool;
pub use tunnel::TunnelChannelPool;

/// Shared handle to a pool stage.
pub type SharedPool = Arc<dyn ChannelPool>;

/// A cache of reusable channels to one endpoint.
pub trait ChannelPool: Send + Sync + fmt::Debug {
    /// Start acquiring a channel, completing `promise` when done.
    fn acquire_with(&self, promise: Promise<Channel>);

    /// Return a channel obtained from [`ChannelPool::acquire`].
    fn release(&self, channel: Channel) -> BoxFuture<'static, NioResult<()>>;

    /// Close the pool and every channel it owns. Idempotent.
    fn close(&self) -> BoxFuture<'static, ()>;

    /// Whether [`ChannelPool::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Add this stage's numbers to `metrics`.
    fn collect_metrics(&self, _metrics: &mut PoolMetrics) {}

    /// Acquire a channel.
    fn acquire(&self) -> PromiseFuture<Channel> {
        let (p, f) = promise();
        self.acquire_with(p);
        f
    }
}

/// Hook invoked when a physical channel is created.
pub trait ChannelPoolHandler: Send + Sync + fmt::Debug {
    /// Called exactly once per new socket channel.
    fn channel_created(&self, channel: &Channel);
}

/// Concurrency figures of one endpoint pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Maximum concurrent leases.
    pub max_concurrency: usize,
    /// Leases that could be granted right now without waiting.
    pub available_concurrency: usize,
    /// Leases currently held.
    pub leased_concurrency: usize,
    /// Callers waiting for a lease.
    pub pending_concurrency_acquires: usize,
    /// Open connections not serving any exchange.
    pub idle_connections: usize,
}

/// Wait for a delegate acquisition on behalf of `promise`.
///
/// Returns `None` when the caller cancelled first. The delegate's promise is
/// then cancelled as well, and a channel it had already produced is closed
/// and released back to it.
pub(crate) async fn await_delegate(
    promise: &mut Promise<Channel>,
    delegate: &SharedPool,
    mut acquiring: PromiseFuture<Channel>,
) -> Option<NioResult<Channel>> {
    tokio::select! {
        biased;
        result = &mut acquiring => return Some(result),
        () = promise.cancelled() => {}
    }
    if let Some(channel) = acquiring.cancel() {
        debug!(channel = %channel, "acquire cancelled after a channel was produced");
        close_and_release(delegate, channel).await;
    }
    None
}

/// Complete `promise`, giving the channel back to `delegate` if the caller
/// has gone away in the meantime.
pub(crate) async fn complete(promise: Promise<Channel>, delegate: &SharedPool, channel: Channel) {
    if let Err(channel) = promise.try_success(channel) {
        debug!(channel = %channel, "acquire cancelled, closing and releasing channel");
        close_and_release(delegate, channel).await;
    }
}

/// Close a channel and release it to `pool`.
pub(crate) async fn close_and_release(pool: &SharedPool, channel: Channel) {
    channel.close();
    if let Err(error) = pool.release(channel.clone()).await {
        warn!(channel = %channel, %error, "failed to release closed channel");
    }
}
