//! Error types for the async HTTP transport.
//!
//! Every failure a caller can observe is a [`NioError`]. The type is
//! cloneable so a single failure can be delivered to the response handler,
//! the response content stream, and the execute future at once; underlying
//! causes are shared behind an [`Arc`].

use std::sync::Arc;
use std::time::Duration;

/// Shared underlying cause of a transport error.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Transport error surfaced by pools, the request executor, and the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NioError {
    /// No connection could be leased within the connection acquisition timeout.
    #[error(
        "Acquire operation took longer than the configured maximum time. This indicates that a \
         request cannot get a connection from the pool within the specified maximum time \
         ({timeout:?}). Consider increasing max connections, increasing the acquire timeout, or \
         slowing the request rate."
    )]
    AcquireTimeout {
        /// The configured acquisition timeout.
        timeout: Duration,
    },

    /// Too many callers are already waiting for a connection.
    #[error(
        "Maximum pending connection acquisitions exceeded. The request rate is too high for the \
         client to keep up. Consider increasing max pending acquires ({max}), max connections, or \
         slowing the request rate."
    )]
    PendingAcquiresExceeded {
        /// The configured pending acquisition limit.
        max: usize,
    },

    /// The TCP connection could not be established in time.
    #[error("connection to {remote} timed out after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` of the remote endpoint.
        remote: String,
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The TCP connection could not be established.
    #[error("failed to connect to {remote}: {source}")]
    Connect {
        /// `host:port` of the remote endpoint.
        remote: String,
        /// Underlying socket error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// TLS handshake failed.
    #[error("Failed TLS connection setup: {source}")]
    Handshake {
        /// Underlying TLS error.
        #[source]
        source: Cause,
    },

    /// The proxy CONNECT tunnel could not be established.
    #[error("Could not establish proxy tunnel: {message}")]
    Tunnel {
        /// Description of the tunnel failure.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Cause>,
    },

    /// The caller cancelled the execution of a request.
    #[error("execution {execution_id} was cancelled")]
    FutureCancelled {
        /// Identifier of the cancelled execution.
        execution_id: u64,
    },

    /// The server sent an HTTP/2 GOAWAY that covers this stream.
    #[error(
        "GOAWAY received from service, requesting this stream be closed (last stream id \
         {last_stream_id})."
    )]
    GoAway {
        /// Last stream id the server promised to process.
        last_stream_id: u32,
    },

    /// The channel was closed before or during the exchange.
    #[error(
        "The connection was closed during the request. The request will usually succeed on a \
         retry, but if it does not: consider disabling any proxies you have configured, enabling \
         debug logging, or performing a TCP dump to identify the root cause. Channel: {channel}"
    )]
    ChannelClosed {
        /// Diagnostic description of the closed channel.
        channel: String,
    },

    /// No response data was read within the read timeout.
    #[error("read timed out after {timeout:?}")]
    ReadTimeout {
        /// The configured read timeout.
        timeout: Duration,
    },

    /// The request could not be written within the write timeout.
    #[error("write timed out after {timeout:?}")]
    WriteTimeout {
        /// The configured write timeout.
        timeout: Duration,
    },

    /// The response body ended before its declared content length.
    #[error(
        "Response had content-length of {expected} bytes, but only {received} bytes were \
         received before the connection was closed."
    )]
    ContentLengthMismatch {
        /// Declared `Content-Length`.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The request body ended before its declared content length.
    #[error(
        "Request content was only {written} bytes, but the specified content-length was \
         {expected} bytes."
    )]
    RequestContentTooShort {
        /// Bytes produced by the request body.
        written: u64,
        /// Declared `Content-Length`.
        expected: u64,
    },

    /// The pool (or the client owning it) has been closed.
    #[error("channel pool is closed")]
    PoolClosed,

    /// The request cannot be sent as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Generic I/O failure, including converted cancellations.
    #[error("{message}")]
    Io {
        /// Description of the failure.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Cause>,
    },

    /// HTTP protocol failure reported by the codec.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result type for transport operations.
pub type NioResult<T> = Result<T, NioError>;

impl NioError {
    /// Create an I/O error carrying an underlying cause.
    #[must_use]
    pub fn io<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Io {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create an I/O error with no underlying cause.
    #[must_use]
    pub fn io_message(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a TLS failure.
    #[must_use]
    pub fn handshake<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handshake {
            source: Arc::new(source),
        }
    }

    /// Convert a cancellation into the I/O category.
    ///
    /// Downstream consumers see cancellation as a plain I/O failure instead
    /// of special-casing it. Every other error is returned unchanged.
    #[must_use]
    pub fn into_io_category(self) -> Self {
        match self {
            Self::FutureCancelled { execution_id } => {
                let cause = std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    format!("execution {execution_id} was cancelled"),
                );
                Self::io(
                    format!("Request attempt {execution_id} failure: the request was cancelled"),
                    cause,
                )
            }
            other => other,
        }
    }

    /// Whether this error is a timeout of any kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AcquireTimeout { .. }
                | Self::ConnectTimeout { .. }
                | Self::ReadTimeout { .. }
                | Self::WriteTimeout { .. }
        )
    }
}

impl From<NioError> for std::io::Error {
    fn from(err: NioError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            NioError::AcquireTimeout { .. }
            | NioError::ConnectTimeout { .. }
            | NioError::ReadTimeout { .. }
            | NioError::WriteTimeout { .. } => ErrorKind::TimedOut,
            NioError::ChannelClosed { .. } | NioError::GoAway { .. } => {
                ErrorKind::ConnectionAborted
            }
            NioError::Connect { source, .. } => source.kind(),
            NioError::FutureCancelled { .. } => ErrorKind::Interrupted,
            NioError::InvalidRequest(_) | NioError::Config(_) => ErrorKind::InvalidInput,
            NioError::ContentLengthMismatch { .. } | NioError::RequestContentTooShort { .. } => {
                ErrorKind::UnexpectedEof
            }
            _ => ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}
