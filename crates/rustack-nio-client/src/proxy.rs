//! HTTP proxy CONNECT tunnels.
//!
//! A proxied socket channel is connected to the proxy. Before any TLS or
//! HTTP handler is installed, [`ProxyTunnelInitHandler`] sends
//! `CONNECT host:port`, waits for a 2xx answer, and swaps the channel's raw
//! transport for the tunneled byte stream. The channel is then initialized
//! as if it were connected to the target directly.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{HOST, PROXY_AUTHORIZATION};
use http::{HeaderValue, Method, Request};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustack_nio_core::{NioError, NioResult, ProxyConfig};
use tracing::debug;

use crate::channel::{Channel, handlers};

/// Establishes a CONNECT tunnel to one target through one proxy.
#[derive(Debug, Clone)]
pub struct ProxyTunnelInitHandler {
    proxy: ProxyConfig,
    target_host: String,
    target_port: u16,
    timeout: Duration,
}

impl ProxyTunnelInitHandler {
    /// Tunnel to `target_host:target_port` through `proxy`, giving up after
    /// `timeout`.
    #[must_use]
    pub fn new(
        proxy: ProxyConfig,
        target_host: impl Into<String>,
        target_port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            proxy,
            target_host: target_host.into(),
            target_port,
            timeout,
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    fn connect_request(&self) -> NioResult<Request<Empty<Bytes>>> {
        let target = self.target();
        let mut request = Request::builder()
            .method(Method::CONNECT)
            .uri(target.as_str())
            .header(HOST, target.as_str())
            .body(Empty::new())
            .map_err(|e| NioError::InvalidRequest(format!("invalid CONNECT target {target}: {e}")))?;

        if let (Some(user), Some(password)) = (&self.proxy.username, &self.proxy.password) {
            let credentials = STANDARD.encode(format!("{user}:{password}"));
            let value = HeaderValue::from_str(&format!("Basic {credentials}"))
                .map_err(|e| NioError::Config(format!("invalid proxy credentials: {e}")))?;
            request.headers_mut().insert(PROXY_AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// Establish the tunnel on `channel`.
    ///
    /// Does nothing when the channel already carries a tunnel.
    pub async fn establish(&self, channel: &Channel) -> NioResult<()> {
        if channel.attributes().tunnel_established() {
            return Ok(());
        }
        match tokio::time::timeout(self.timeout, self.handshake(channel)).await {
            Ok(result) => result,
            Err(_) => Err(NioError::Tunnel {
                message: format!(
                    "CONNECT to {} via {} timed out after {:?}",
                    self.target(),
                    self.proxy.authority(),
                    self.timeout
                ),
                source: None,
            }),
        }
    }

    async fn handshake(&self, channel: &Channel) -> NioResult<()> {
        let raw = channel.take_raw_io()?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(raw))
            .await
            .map_err(|e| tunnel_error("proxy handshake failed", e))?;
        let driver = channel
            .event_loop()
            .spawn(async move { conn.with_upgrades().await });
        channel
            .pipeline()
            .add_last(handlers::PROXY_TUNNEL_INIT, Some(driver.abort_handle()));

        debug!(channel = %channel, target = %self.target(), "sending CONNECT");
        let response = sender
            .send_request(self.connect_request()?)
            .await
            .map_err(|e| tunnel_error("CONNECT request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            channel.pipeline().remove(handlers::PROXY_TUNNEL_INIT);
            return Err(NioError::Tunnel {
                message: format!("proxy responded to CONNECT with {status}"),
                source: None,
            });
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| tunnel_error("proxy tunnel upgrade failed", e))?;
        channel.pipeline().remove(handlers::PROXY_TUNNEL_INIT);
        channel.set_raw_io(Box::new(TokioIo::new(upgraded)));
        channel.attributes().set_tunnel_established();
        debug!(channel = %channel, target = %self.target(), "proxy tunnel established");
        Ok(())
    }
}

fn tunnel_error(message: &str, source: hyper::Error) -> NioError {
    NioError::Tunnel {
        message: format!("{message}: {source}"),
        source: Some(std::sync::Arc::new(source)),
    }
}
