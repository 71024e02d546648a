//! Cancellation integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rustack_nio_client::{AsyncExecuteRequest, BufferingResponseHandler, NioError};
    use rustack_nio_core::NioConfig;

    use crate::{TestServer, client, delayed_echo, eventually, get};

    fn config() -> NioConfig {
        NioConfig::builder()
            .max_connections(1)
            .connection_acquisition_timeout(Duration::from_secs(2))
            .event_loop_threads(1)
            .build()
    }

    #[tokio::test]
    async fn test_should_release_connection_when_exchange_is_dropped() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(300))).await;
        let client = client(config());
        let uri = server.uri("/");

        let (handler, _rx) = BufferingResponseHandler::new();
        let running = client.execute(AsyncExecuteRequest::new(get(&uri), handler));
        assert!(eventually(Duration::from_secs(1), || server.stats().requests() == 1).await);
        drop(running);

        assert!(
            eventually(Duration::from_secs(1), || {
                client
                    .pool_metrics(&uri.parse().unwrap())
                    .is_some_and(|m| m.leased_concurrency == 0)
            })
            .await
        );
        assert!(eventually(Duration::from_secs(1), || server.stats().closed() == 1).await);

        // The only lease is free again.
        let response = client.execute_buffered(get(&uri)).await.unwrap();
        assert_eq!(response.body(), "GET /");
        assert_eq!(server.stats().accepted(), 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_resolve_cancelled_execution_with_io_error() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(300))).await;
        let client = client(config());
        let uri = server.uri("/");

        let (first_handler, _first_rx) = BufferingResponseHandler::new();
        let first = client.execute(AsyncExecuteRequest::new(get(&uri), first_handler));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (handler, rx) = BufferingResponseHandler::new();
        let mut waiting = client.execute(AsyncExecuteRequest::new(get(&uri), handler));
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiting.cancel();

        let error = waiting.await.unwrap_err();
        assert!(matches!(error, NioError::Io { .. }), "{error}");
        assert!(error.to_string().contains("cancelled"), "{error}");
        assert!(rx.await.is_ok_and(|r| r.is_err()));

        first.await.unwrap();
        let metrics = client.pool_metrics(&uri.parse().unwrap()).unwrap();
        assert_eq!(metrics.pending_concurrency_acquires, 0);
        assert_eq!(metrics.leased_concurrency, 0);

        // The connection used by the first exchange is reused.
        client.execute_buffered(get(&uri)).await.unwrap();
        assert_eq!(server.stats().accepted(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_not_leak_leases_under_repeated_cancellation() {
        let server = TestServer::http1(delayed_echo(Duration::from_millis(20))).await;
        let client = client(
            NioConfig::builder()
                .max_connections(2)
                .event_loop_threads(2)
                .build(),
        );
        let uri = server.uri("/");

        for i in 0..20u64 {
            let (handler, _rx) = BufferingResponseHandler::new();
            let running = client.execute(AsyncExecuteRequest::new(get(&uri), handler));
            tokio::time::sleep(Duration::from_millis(i % 5 * 5)).await;
            drop(running);
        }

        assert!(
            eventually(Duration::from_secs(2), || {
                client
                    .pool_metrics(&uri.parse().unwrap())
                    .is_some_and(|m| m.leased_concurrency == 0 && m.available_concurrency == 2)
            })
            .await
        );
        let response = client.execute_buffered(get(&uri)).await.unwrap();
        assert_eq!(response.body(), "GET /");
        client.close().await;
    }
}
