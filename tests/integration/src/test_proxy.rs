//! Proxy CONNECT tunnel integration tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use rustack_nio_client::NioError;
    use rustack_nio_core::{NioConfig, ProxyConfig};

    use crate::{TestProxy, TestServer, client, echo, get};

    fn config(proxy: ProxyConfig) -> NioConfig {
        NioConfig::builder()
            .proxy(proxy)
            .event_loop_threads(1)
            .build()
    }

    #[tokio::test]
    async fn test_should_tunnel_through_proxy_and_reuse_tunnel() {
        let server = TestServer::http1(echo()).await;
        let proxy = TestProxy::start(None).await;
        let client = client(config(proxy.config()));

        let first = client.execute_buffered(get(&server.uri("/one"))).await.unwrap();
        let second = client.execute_buffered(get(&server.uri("/two"))).await.unwrap();

        assert_eq!(first.body(), "GET /one");
        assert_eq!(second.body(), "GET /two");
        assert_eq!(proxy.stats().tunnels.load(Ordering::SeqCst), 1);
        assert_eq!(server.stats().accepted(), 1);
        let target = format!("127.0.0.1:{}", server.uri("").rsplit(':').next().unwrap());
        assert_eq!(*proxy.stats().targets.lock(), vec![target]);
        assert_eq!(*proxy.stats().authorizations.lock(), vec![None]);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_tunnel_tls_through_proxy() {
        let server = TestServer::tls(echo(), &[b"h2", b"http/1.1"]).await;
        let proxy = TestProxy::start(None).await;
        let client = client(
            NioConfig::builder()
                .proxy(proxy.config())
                .trust_all_certificates(true)
                .protocol(rustack_nio_core::Protocol::Http2)
                .event_loop_threads(1)
                .build(),
        );

        let response = client.execute_buffered(get(&server.uri("/secure"))).await.unwrap();

        assert_eq!(response.version(), http::Version::HTTP_2);
        assert_eq!(response.body(), "GET /secure");
        assert_eq!(proxy.stats().tunnels.load(Ordering::SeqCst), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_send_proxy_credentials() {
        let server = TestServer::http1(echo()).await;
        let proxy = TestProxy::start(Some(("alice", "secret"))).await;
        let mut proxy_config = proxy.config();
        proxy_config.username = Some("alice".to_owned());
        proxy_config.password = Some("secret".to_owned());
        let client = client(config(proxy_config));

        let response = client.execute_buffered(get(&server.uri("/"))).await.unwrap();

        assert_eq!(response.body(), "GET /");
        assert_eq!(
            *proxy.stats().authorizations.lock(),
            vec![Some("Basic YWxpY2U6c2VjcmV0".to_owned())]
        );
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_fail_when_proxy_rejects_connect() {
        let server = TestServer::http1(echo()).await;
        let proxy = TestProxy::start(Some(("alice", "secret"))).await;
        let client = client(config(proxy.config()));

        let error = client
            .execute_buffered(get(&server.uri("/")))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::Tunnel { .. }), "{error}");
        assert!(error.to_string().contains("407"), "{error}");
        assert_eq!(server.stats().accepted(), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_bypass_proxy_for_non_proxy_hosts() {
        let server = TestServer::http1(echo()).await;
        let proxy = TestProxy::start(None).await;
        let mut proxy_config = proxy.config();
        proxy_config.non_proxy_hosts = vec!["127.0.0.*".to_owned()];
        let client = client(config(proxy_config));

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();

        assert!(proxy.stats().targets.lock().is_empty());
        assert_eq!(server.stats().accepted(), 1);
        client.close().await;
    }
}
