//! Channel pipeline initialization.
//!
//! Every new socket channel to an endpoint goes through
//! [`ChannelPipelineInitializer`]: TLS (for `https`), protocol selection,
//! the HTTP/1.1 or HTTP/2 codec, and the idle and age reapers. Setup runs on
//! the channel's own event loop. Its outcome is published through the
//! channel's handshake and protocol attributes, which is what the pool
//! stages wait on.

use std::sync::Arc;

use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use rustack_nio_core::{NioConfig, NioError, NioResult, Protocol};
use tracing::{debug, trace};

use crate::channel::{BoxIo, Channel, handlers};
use crate::goaway::GoAwayDetectingIo;
use crate::pool::ChannelPoolHandler;
use crate::reaper::{install_age_reaper, install_idle_reaper};
use crate::request::RequestBody;
use crate::tls::TlsContext;

/// Installs TLS, the protocol codec, and the reapers on new channels.
#[derive(Debug, Clone)]
pub struct ChannelPipelineInitializer {
    config: Arc<NioConfig>,
    tls: Option<TlsContext>,
    host: String,
}

impl ChannelPipelineInitializer {
    /// Initializer for channels to `host`; `tls` is set for `https`
    /// endpoints.
    #[must_use]
    pub fn new(config: Arc<NioConfig>, tls: Option<TlsContext>, host: impl Into<String>) -> Self {
        Self {
            config,
            tls,
            host: host.into(),
        }
    }

    async fn setup(&self, channel: &Channel) -> NioResult<Protocol> {
        let raw = channel.take_raw_io()?;
        let (io, negotiated) = match &self.tls {
            Some(tls) => {
                let (stream, negotiated) = self.tls_connect(tls, raw).await.inspect_err(|e| {
                    channel.resolve_handshake(Err(e.clone()));
                })?;
                channel.resolve_handshake(Ok(()));
                (Box::new(stream) as BoxIo, negotiated)
            }
            None => (raw, None),
        };

        let protocol = negotiated.unwrap_or(self.config.protocol);
        trace!(channel = %channel, %protocol, alpn = ?negotiated, "selected protocol");
        match protocol {
            Protocol::Http1_1 => self.install_http1(channel, io).await?,
            Protocol::Http2 => self.install_http2(channel, io).await?,
        }

        if self.config.reap_idle_connections {
            install_idle_reaper(channel, self.config.connection_max_idle_time);
        }
        if let Some(ttl) = self.config.connection_time_to_live {
            install_age_reaper(channel, ttl);
        }
        if channel.is_closed() {
            return Err(channel.closed_error());
        }
        Ok(protocol)
    }

    async fn tls_connect(
        &self,
        tls: &TlsContext,
        raw: BoxIo,
    ) -> NioResult<(tokio_rustls::client::TlsStream<BoxIo>, Option<Protocol>)> {
        let timeout = self.config.tls_negotiation_timeout;
        match tokio::time::timeout(timeout, tls.connect(&self.host, raw)).await {
            Ok(result) => result,
            Err(_) => Err(NioError::handshake(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("TLS handshake timed out after {timeout:?}"),
            ))),
        }
    }

    async fn install_http1(&self, channel: &Channel, io: BoxIo) -> NioResult<()> {
        let (sender, conn) = http1::Builder::new()
            .handshake::<_, RequestBody>(TokioIo::new(io))
            .await
            .map_err(|e| channel.decorate_error(e))?;
        let weak = channel.downgrade();
        let driver = channel.event_loop().spawn(async move {
            let result = conn.await;
            if let Some(channel) = weak.upgrade() {
                if let Err(error) = result {
                    channel.fire_exception_caught(channel.decorate_error(error));
                }
                channel.close();
            }
        });
        channel
            .pipeline()
            .add_last(handlers::HTTP1_CODEC, Some(driver.abort_handle()));
        channel.set_http1_sender(sender);
        Ok(())
    }

    async fn install_http2(&self, channel: &Channel, io: BoxIo) -> NioResult<()> {
        let weak = channel.downgrade();
        let io = GoAwayDetectingIo::new(io, move |last_stream_id| {
            if let Some(channel) = weak.upgrade() {
                debug!(channel = %channel, last_stream_id, "GOAWAY received");
                channel.attributes().set_go_away(last_stream_id);
            }
        });

        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder.timer(TokioTimer::new());
        if let Some(interval) = self.config.http2_ping_interval {
            builder
                .keep_alive_interval(interval)
                .keep_alive_while_idle(true);
        }
        let (sender, conn) = builder
            .handshake::<_, RequestBody>(TokioIo::new(io))
            .await
            .map_err(|e| channel.decorate_error(e))?;

        let weak = channel.downgrade();
        let driver = channel.event_loop().spawn(async move {
            let result = conn.await;
            if let Some(channel) = weak.upgrade() {
                if let Err(error) = result {
                    channel.fire_exception_caught(channel.decorate_error(error));
                }
                channel.close();
            }
        });
        channel
            .pipeline()
            .add_last(handlers::HTTP2_CODEC, Some(driver.abort_handle()));
        channel.set_http2_sender(sender);
        Ok(())
    }
}

impl ChannelPoolHandler for ChannelPipelineInitializer {
    fn channel_created(&self, channel: &Channel) {
        if self.tls.is_some() {
            channel.pipeline().add_last(handlers::SSL, None);
        }
        let initializer = self.clone();
        let target = channel.clone();
        channel.event_loop().spawn(async move {
            match initializer.setup(&target).await {
                Ok(protocol) => {
                    debug!(channel = %target, %protocol, "channel initialized");
                    target.resolve_protocol(Ok(protocol));
                }
                Err(error) => {
                    debug!(channel = %target, %error, "channel initialization failed");
                    target.resolve_protocol(Err(error));
                    target.close();
                }
            }
        });
    }
}
