//! Pool bound integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rustack_nio_client::{AsyncExecuteRequest, BufferingResponseHandler, NioError};
    use rustack_nio_core::NioConfig;

    use crate::{TestServer, client, delayed_echo, get};

    #[tokio::test]
    async fn test_should_time_out_acquire_when_pool_exhausted() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(500))).await;
        let client = client(
            NioConfig::builder()
                .max_connections(1)
                .connection_acquisition_timeout(Duration::from_millis(100))
                .event_loop_threads(1)
                .build(),
        );

        let (first, second) = tokio::join!(
            client.execute_buffered(get(&server.uri("/a"))),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.execute_buffered(get(&server.uri("/b"))).await
            }
        );

        assert!(first.is_ok());
        let error = second.unwrap_err();
        assert!(matches!(error, NioError::AcquireTimeout { .. }), "{error}");
        assert!(error.is_timeout());
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_reject_acquires_over_pending_limit() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(300))).await;
        let client = client(
            NioConfig::builder()
                .max_connections(1)
                .max_pending_connection_acquires(1)
                .event_loop_threads(1)
                .build(),
        );

        let start = |path: &str| {
            let (handler, _rx) = BufferingResponseHandler::new();
            client.execute(AsyncExecuteRequest::new(get(&server.uri(path)), handler))
        };
        let holding = start("/holding");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let waiting = start("/waiting");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let rejected = start("/rejected").await;

        assert!(
            matches!(rejected, Err(NioError::PendingAcquiresExceeded { max: 1 })),
            "{rejected:?}"
        );
        assert!(holding.await.is_ok());
        assert!(waiting.await.is_ok());
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_report_pool_metrics() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(200))).await;
        let client = client(
            NioConfig::builder()
                .max_connections(3)
                .event_loop_threads(1)
                .build(),
        );
        let uri = server.uri("/");
        assert!(client.pool_metrics(&uri.parse().unwrap()).is_none());

        let (handler, _rx) = BufferingResponseHandler::new();
        let running = client.execute(AsyncExecuteRequest::new(get(&uri), handler));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let metrics = client.pool_metrics(&uri.parse().unwrap()).unwrap();
        assert_eq!(metrics.max_concurrency, 3);
        assert_eq!(metrics.leased_concurrency, 1);
        assert_eq!(metrics.available_concurrency, 2);

        running.await.unwrap();
        let metrics = client.pool_metrics(&uri.parse().unwrap()).unwrap();
        assert_eq!(metrics.leased_concurrency, 0);
        client.close().await;
    }
}
