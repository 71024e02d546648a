//! Pooled asynchronous HTTP/1.1 and HTTP/2 client transport for Rustack.
//!
//! Connections are owned by [`rustack_nio_core::EventLoop`]s and cached per
//! endpoint in a stack of [`pool`] decorators. A request is driven by a
//! [`RequestExecutor`], which acquires a channel, writes the request, and
//! streams the response to a [`ResponseHandler`]. Proxy CONNECT tunnels,
//! TLS with ALPN, HTTP/2 multiplexing with GOAWAY handling, and idle and
//! age reaping are all handled below the executor.
//!
//! [`NioAsyncHttpClient`] is the entry point.

pub mod bootstrap;
pub mod channel;
pub mod client;
pub mod executor;
pub mod goaway;
pub mod pipeline;
pub mod pool;
pub mod pool_map;
pub mod proxy;
pub mod reaper;
pub mod request;
pub mod response;
pub mod timeout;
pub mod tls;

pub use channel::{Channel, ChannelId};
pub use client::{EventLoopGroupSource, NioAsyncHttpClient, NioAsyncHttpClientBuilder};
pub use executor::{ExecuteFuture, RequestContext, RequestExecutor};
pub use pool::{ChannelPool, PoolMetrics};
pub use pool_map::{ChannelPoolMap, PoolKey};
pub use request::{AsyncExecuteRequest, RequestBody};
pub use response::{BufferingResponseHandler, ResponseContentStream, ResponseHandler};
pub use rustack_nio_core::{
    EventLoopGroup, NioConfig, NioError, NioResult, Protocol, ProxyConfig, SharedEventLoopGroup,
};
