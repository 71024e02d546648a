//! Idle and age reaping integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rustack_nio_core::NioConfig;

    use crate::{TestServer, client, echo, eventually, get};

    #[tokio::test]
    async fn test_should_reap_idle_connection() {
        let server = TestServer::http1(echo()).await;
        let client = client(
            NioConfig::builder()
                .connection_max_idle_time(Duration::from_millis(200))
                .event_loop_threads(1)
                .build(),
        );

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert!(eventually(Duration::from_secs(1), || client.idle_connection_count() == 1).await);

        assert!(eventually(Duration::from_secs(2), || server.stats().closed() == 1).await);
        assert_eq!(client.idle_connection_count(), 0);

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert_eq!(server.stats().accepted(), 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_keep_connections_when_reaping_disabled() {
        let server = TestServer::http1(echo()).await;
        let client = client(
            NioConfig::builder()
                .connection_max_idle_time(Duration::from_millis(50))
                .reap_idle_connections(false)
                .event_loop_threads(1)
                .build(),
        );

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(server.stats().closed(), 0);
        assert_eq!(client.idle_connection_count(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_close_connection_after_time_to_live() {
        let server = TestServer::http1(echo()).await;
        let client = client(
            NioConfig::builder()
                .connection_time_to_live(Duration::from_millis(200))
                .reap_idle_connections(false)
                .event_loop_threads(1)
                .build(),
        );

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert!(eventually(Duration::from_secs(2), || server.stats().closed() == 1).await);

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        assert_eq!(server.stats().accepted(), 2);
        client.close().await;
    }
}
