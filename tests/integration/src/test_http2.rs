//! HTTP/2 multiplexing and GOAWAY integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Version;
    use rustack_nio_core::{NioConfig, Protocol};

    use crate::{TestServer, client, delayed_echo, echo, eventually, get};

    fn config() -> NioConfig {
        NioConfig::builder()
            .protocol(Protocol::Http2)
            .event_loop_threads(2)
            .build()
    }

    #[tokio::test]
    async fn test_should_multiplex_concurrent_requests_on_one_connection() {
        let server = TestServer::http2(delayed_echo(Duration::from_millis(100))).await;
        let client = client(config());

        let requests = (0..10).map(|i| client.execute_buffered(get(&server.uri(&format!("/{i}")))));
        let responses = futures::future::join_all(requests).await;

        for (i, response) in responses.into_iter().enumerate() {
            let response = response.unwrap();
            assert_eq!(response.version(), Version::HTTP_2);
            assert_eq!(response.body(), format!("GET /{i}").as_str());
        }
        assert_eq!(server.stats().accepted(), 1);
        assert_eq!(server.stats().requests(), 10);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_bound_concurrent_streams_by_max_connections() {
        let server = TestServer::http2(delayed_echo(Duration::from_millis(50))).await;
        let client = client(
            NioConfig::builder()
                .protocol(Protocol::Http2)
                .max_connections(2)
                .event_loop_threads(1)
                .build(),
        );

        let requests = (0..6).map(|_| client.execute_buffered(get(&server.uri("/"))));
        let responses = futures::future::join_all(requests).await;

        assert!(responses.iter().all(Result::is_ok));
        let metrics = client.pool_metrics(&server.uri("/").parse().unwrap()).unwrap();
        assert_eq!(metrics.max_concurrency, 2);
        assert_eq!(metrics.leased_concurrency, 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_open_new_connection_after_go_away() {
        let server = TestServer::http2(echo()).await;
        let client = client(config());

        client.execute_buffered(get(&server.uri("/first"))).await.unwrap();
        assert_eq!(server.stats().accepted(), 1);

        server.go_away();
        assert!(eventually(Duration::from_secs(2), || server.stats().closed() == 1).await);

        let response = client.execute_buffered(get(&server.uri("/second"))).await.unwrap();
        assert_eq!(response.body(), "GET /second");
        assert_eq!(server.stats().accepted(), 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_finish_in_flight_stream_after_go_away() {
        let server = TestServer::http2(delayed_echo(Duration::from_millis(200))).await;
        let client = client(config());

        let in_flight = client.execute_buffered(get(&server.uri("/slow")));
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.go_away();
        };
        let (response, ()) = tokio::join!(in_flight, trigger);

        assert_eq!(response.unwrap().body(), "GET /slow");
        client.close().await;
    }
}
