//! Failure path integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rustack_nio_client::NioError;
    use rustack_nio_core::NioConfig;
    use tokio::io::AsyncWriteExt;

    use crate::{RawServer, client, get, read_request_head};

    fn config() -> NioConfig {
        NioConfig::builder().event_loop_threads(1).build()
    }

    #[tokio::test]
    async fn test_should_fail_when_server_closes_mid_body() {
        let server = RawServer::start(|mut stream| async move {
            let _ = read_request_head(&mut stream).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nonly ten b")
                .await;
        })
        .await;
        let client = client(config());

        let error = client
            .execute_buffered(get(&server.uri("/")))
            .await
            .unwrap_err();

        assert!(
            matches!(
                error,
                NioError::ChannelClosed { .. } | NioError::ContentLengthMismatch { .. }
            ),
            "{error}"
        );
        assert_eq!(client.idle_connection_count(), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_fail_when_server_closes_before_responding() {
        let server = RawServer::start(|mut stream| async move {
            let _ = read_request_head(&mut stream).await;
        })
        .await;
        let client = client(config());

        let error = client
            .execute_buffered(get(&server.uri("/")))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::ChannelClosed { .. }), "{error}");
        assert!(error.to_string().starts_with("The connection was closed during the request"));
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_fail_with_connect_error_when_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let client = client(config());

        let error = client
            .execute_buffered(get(&format!("http://127.0.0.1:{port}/")))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::Connect { .. }), "{error}");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_time_out_slow_response() {
        let server = RawServer::start(|mut stream| async move {
            let _ = read_request_head(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        let client = client(
            NioConfig::builder()
                .read_timeout(Duration::from_millis(200))
                .event_loop_threads(1)
                .build(),
        );

        let started = std::time::Instant::now();
        let error = client
            .execute_buffered(get(&server.uri("/")))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::ReadTimeout { .. }), "{error}");
        assert!(error.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_reject_unsupported_scheme() {
        let client = client(config());

        let error = client
            .execute_buffered(get("ftp://127.0.0.1/file"))
            .await
            .unwrap_err();

        assert!(matches!(error, NioError::InvalidRequest(_)), "{error}");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_not_reuse_connection_after_failure() {
        let server = RawServer::start(|mut stream| async move {
            let _ = read_request_head(&mut stream).await;
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok").await;
            let _ = read_request_head(&mut stream).await;
            let _ = stream.write_all(b"garbage\r\n\r\n").await;
        })
        .await;
        let client = client(config());

        let response = client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert_eq!(response.body(), "ok");
        assert!(client.execute_buffered(get(&server.uri("/"))).await.is_err());

        let response = client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert_eq!(response.body(), "ok");
        assert_eq!(server.accepted(), 2);
        client.close().await;
    }
}
