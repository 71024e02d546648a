//! TLS and ALPN integration tests.

#[cfg(test)]
mod tests {
    use http::Version;
    use rustack_nio_client::NioError;
    use rustack_nio_core::{NioConfig, Protocol};

    use crate::{TestServer, client, echo, get};

    fn config(protocol: Protocol) -> NioConfig {
        NioConfig::builder()
            .protocol(protocol)
            .trust_all_certificates(true)
            .event_loop_threads(1)
            .build()
    }

    #[tokio::test]
    async fn test_should_negotiate_http2_with_alpn() {
        let server = TestServer::tls(echo(), &[b"h2", b"http/1.1"]).await;
        let client = client(config(Protocol::Http2));

        let response = client.execute_buffered(get(&server.uri("/secure"))).await.unwrap();

        assert_eq!(response.version(), Version::HTTP_2);
        assert_eq!(response.body(), "GET /secure");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_use_http1_when_server_selects_it() {
        let server = TestServer::tls(echo(), &[b"http/1.1"]).await;
        let client = client(config(Protocol::Http2));

        let response = client.execute_buffered(get(&server.uri("/"))).await.unwrap();

        assert_eq!(response.version(), Version::HTTP_11);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_only_offer_http1_when_configured() {
        let server = TestServer::tls(echo(), &[b"h2", b"http/1.1"]).await;
        let client = client(config(Protocol::Http1_1));

        let first = client.execute_buffered(get(&server.uri("/1"))).await.unwrap();
        let second = client.execute_buffered(get(&server.uri("/2"))).await.unwrap();

        assert_eq!(first.version(), Version::HTTP_11);
        assert_eq!(second.body(), "GET /2");
        assert_eq!(server.stats().accepted(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_fail_handshake_with_untrusted_certificate() {
        let server = TestServer::tls(echo(), &[b"http/1.1"]).await;
        let client = client(
            NioConfig::builder()
                .event_loop_threads(1)
                .build(),
        );

        let error = client
            .execute_buffered(get(&server.uri("/")))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::Handshake { .. }), "{error}");
        assert!(error.to_string().starts_with("Failed TLS connection setup"));
        assert_eq!(client.idle_connection_count(), 0);
        client.close().await;
    }
}
