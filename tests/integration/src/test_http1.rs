//! HTTP/1.1 exchange integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::{Request, Response, StatusCode, Version};
    use http_body_util::Full;
    use rustack_nio_client::{BufferingResponseHandler, RequestBody};
    use rustack_nio_core::NioConfig;

    use crate::{TestServer, client, echo, eventually, get, handler};

    fn config() -> NioConfig {
        NioConfig::builder().event_loop_threads(2).build()
    }

    #[tokio::test]
    async fn test_should_get_response_over_http1() {
        let server = TestServer::http1(echo()).await;
        let client = client(config());

        let response = client.execute_buffered(get(&server.uri("/hello"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.version(), Version::HTTP_11);
        assert_eq!(response.body(), "GET /hello");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_send_request_body() {
        let server = TestServer::http1(echo()).await;
        let client = client(config());

        let request = Request::put(server.uri("/upload"))
            .body(RequestBody::from_bytes("payload bytes"))
            .unwrap();
        let response = client.execute_buffered(request).await.unwrap();

        assert_eq!(response.body(), "payload bytes");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_stream_request_body() {
        let server = TestServer::http1(echo()).await;
        let client = client(config());

        let chunks = futures::stream::iter(
            ["one ", "two ", "three"]
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
        );
        let request = Request::post(server.uri("/stream"))
            .body(RequestBody::from_stream(chunks))
            .unwrap();
        let response = client.execute_buffered(request).await.unwrap();

        assert_eq!(response.body(), "one two three");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_reuse_connection_for_sequential_requests() {
        let server = TestServer::http1(echo()).await;
        let client = client(config());

        for i in 0..5 {
            let response = client
                .execute_buffered(get(&server.uri(&format!("/{i}"))))
                .await
                .unwrap();
            assert_eq!(response.body(), format!("GET /{i}").as_str());
        }

        assert_eq!(server.stats().accepted(), 1);
        assert!(eventually(Duration::from_secs(1), || client.idle_connection_count() == 1).await);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_open_new_connection_after_connection_close() {
        let server = TestServer::http1(handler(|_, _| async {
            Response::builder()
                .header(http::header::CONNECTION, "close")
                .body(Full::new(Bytes::from_static(b"bye")))
                .unwrap()
        }))
        .await;
        let client = client(config());

        client.execute_buffered(get(&server.uri("/"))).await.unwrap();
        client.execute_buffered(get(&server.uri("/"))).await.unwrap();

        assert_eq!(server.stats().accepted(), 2);
        assert!(eventually(Duration::from_secs(1), || client.idle_connection_count() == 0).await);
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_deliver_headers_and_status_to_handler() {
        let server = TestServer::http1(handler(|_, _| async {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header("x-request-id", "abc")
                .body(Full::new(Bytes::from_static(b"missing")))
                .unwrap()
        }))
        .await;
        let client = client(config());

        let (handler, rx) = BufferingResponseHandler::new();
        client
            .execute(rustack_nio_client::AsyncExecuteRequest::new(
                get(&server.uri("/nothing")),
                handler,
            ))
            .await
            .unwrap();
        let response = rx.await.unwrap().unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-request-id"], "abc");
        assert_eq!(response.body(), "missing");
        client.close().await;
    }

    #[tokio::test]
    async fn test_should_handle_head_without_body() {
        let server = TestServer::http1(echo()).await;
        let client = client(config());

        let request = Request::head(server.uri("/"))
            .body(RequestBody::empty())
            .unwrap();
        let response = client.execute_buffered(request).await.unwrap();
        assert!(response.body().is_empty());

        // The connection is still usable afterwards.
        let response = client.execute_buffered(get(&server.uri("/again"))).await.unwrap();
        assert_eq!(response.body(), "GET /again");
        assert_eq!(server.stats().accepted(), 1);
        client.close().await;
    }
}
