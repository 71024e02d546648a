//! Physical connection establishment.
//!
//! A [`Bootstrap`] keeps its target as an unresolved `host:port` pair, so
//! every connect attempt resolves DNS again and a pool never pins a stale
//! address.

use std::time::Duration;

use rustack_nio_core::{EventLoopGroup, NioError, NioResult};
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::Channel;

/// Connects new socket channels to one unresolved address.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    group: EventLoopGroup,
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl Bootstrap {
    /// `host:port` this bootstrap connects to.
    #[must_use]
    pub fn remote(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a new socket channel registered with the next event loop.
    pub async fn connect(&self) -> NioResult<Channel> {
        let event_loop = self.group.next();
        let host = self.host.clone();
        let port = self.port;
        let remote = self.remote();
        let connect_timeout = self.connect_timeout;

        let registered_loop = event_loop.clone();
        let stream = event_loop
            .spawn(async move {
                match tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(source)) => Err(NioError::Connect {
                        remote: format!("{host}:{port}"),
                        source: source.into(),
                    }),
                    Err(_) => Err(NioError::ConnectTimeout {
                        remote: format!("{host}:{port}"),
                        timeout: connect_timeout,
                    }),
                }
            })
            .await
            .map_err(|e| NioError::io("event loop stopped while connecting", e))??;

        let _ = stream.set_nodelay(true);
        let channel = Channel::new_socket(registered_loop, remote, Box::new(stream));
        debug!(channel = %channel, "connected");
        Ok(channel)
    }
}

/// Creates [`Bootstrap`]s sharing one event loop group and connect timeout.
#[derive(Debug, Clone)]
pub struct BootstrapProvider {
    group: EventLoopGroup,
    connect_timeout: Duration,
}

impl BootstrapProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(group: EventLoopGroup, connect_timeout: Duration) -> Self {
        Self {
            group,
            connect_timeout,
        }
    }

    /// A bootstrap for `host:port`, left unresolved.
    #[must_use]
    pub fn create_bootstrap(&self, host: &str, port: u16) -> Bootstrap {
        Bootstrap {
            group: self.group.clone(),
            host: host.to_owned(),
            port,
            connect_timeout: self.connect_timeout,
        }
    }
}
