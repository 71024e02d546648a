//! Core types for the Rustack asynchronous HTTP transport.
//!
//! This crate holds the pieces shared by every layer of the transport: the
//! transport configuration, the error taxonomy surfaced to callers, a
//! cancellable promise primitive used to hand channels between pool stages,
//! and the single-threaded event loops that own connections.

pub mod config;
mod error;
pub mod event_loop;
pub mod promise;

pub use config::{NioConfig, Protocol, ProxyConfig};
pub use error::{NioError, NioResult};
pub use event_loop::{EventLoop, EventLoopGroup, SharedEventLoopGroup, SharedEventLoopGroupRef};
pub use promise::{Promise, PromiseFuture, promise};
