//! TLS client context.
//!
//! Builds one rustls client configuration per client. ALPN offers `h2`
//! ahead of `http/1.1` when HTTP/2 is configured, so the negotiated protocol
//! decides which codec a connection gets.

use std::fmt;
use std::sync::Arc;

use rustack_nio_core::{NioConfig, NioError, NioResult, Protocol};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::channel::BoxIo;

const ALPN_H2: &[u8] = b"h2";
const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Shared TLS connector.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Build a context from the transport configuration.
    pub fn new(config: &NioConfig) -> NioResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| NioError::Config(format!("invalid TLS protocol versions: {e}")))?;

        let mut tls = if config.trust_all_certificates {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustAllVerifier {
                    algorithms: provider.signature_verification_algorithms,
                }))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        tls.alpn_protocols = match config.protocol {
            Protocol::Http2 => vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()],
            Protocol::Http1_1 => vec![ALPN_HTTP1.to_vec()],
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls)),
        })
    }

    /// Run the client handshake over `io`.
    ///
    /// Returns the TLS stream and the ALPN-selected protocol, if the server
    /// selected one.
    pub async fn connect(
        &self,
        host: &str,
        io: BoxIo,
    ) -> NioResult<(TlsStream<BoxIo>, Option<Protocol>)> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| NioError::handshake(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let stream = self
            .connector
            .connect(server_name, io)
            .await
            .map_err(NioError::handshake)?;

        let negotiated = stream.get_ref().1.alpn_protocol().map(|alpn| {
            if alpn == ALPN_H2 {
                Protocol::Http2
            } else {
                Protocol::Http1_1
            }
        });
        Ok((stream, negotiated))
    }
}

/// Accepts every server certificate while still checking signatures.
#[derive(Debug)]
struct TrustAllVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
