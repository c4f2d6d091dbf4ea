use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use json_poster::{HttpPoster, PostError, REQUEST_URL_FIELD, ResponseEnvelope, STATUS_FIELD};
use sonic_rs::JsonValueTrait;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn capture() -> (
    oneshot::Receiver<ResponseEnvelope>,
    impl FnOnce(ResponseEnvelope) + Send + 'static,
) {
    let (tx, rx) = oneshot::channel();
    let callback = move |envelope: ResponseEnvelope| {
        let _ = tx.send(envelope);
    };
    (rx, callback)
}

#[tokio::test]
async fn e2e_callback_receives_echoed_body_with_metadata() {
    let server = TestServer::start().await;
    let poster = HttpPoster::new();
    let url = server.url("/echo");
    let (rx, callback) = capture();

    poster
        .post(url.clone(), r#"{"recipe":"soup"}"#, Some(callback))
        .await
        .expect("echo should complete");

    let value = rx.await.expect("callback should fire").into_value();
    assert_eq!(value.get("recipe").and_then(|v| v.as_str()), Some("soup"));
    assert_eq!(value.get(REQUEST_URL_FIELD).and_then(|v| v.as_str()), Some(url.as_str()));
    assert_eq!(value.get(STATUS_FIELD).and_then(|v| v.as_u64()), Some(200));
}

#[tokio::test]
async fn e2e_body_is_sent_unmodified() {
    let server = TestServer::start().await;
    let poster = HttpPoster::new();

    let envelope = poster
        .post_envelope(server.url("/length"), "username=a&password=b")
        .await
        .expect("length endpoint returns json");

    assert_eq!(envelope.get("length").and_then(|v| v.as_u64()), Some(21));
    assert_eq!(envelope.get("content_type").and_then(|v| v.as_str()), Some(""));
}

#[tokio::test]
async fn e2e_error_status_is_delivered() {
    let server = TestServer::start().await;
    let poster = HttpPoster::new();
    let (rx, callback) = capture();

    poster
        .post(server.url("/forbidden"), "", Some(callback))
        .await
        .expect("403 with json body is still delivered");

    let envelope = rx.await.expect("callback should fire");
    assert_eq!(envelope.status(), 403);
    assert_eq!(envelope.get("error").and_then(|v| v.as_str()), Some("not logged in"));
}

#[tokio::test]
async fn e2e_empty_404_is_malformed() {
    let server = TestServer::start().await;
    let poster = HttpPoster::new();
    let (mut rx, callback) = capture();

    let err = poster
        .post(server.url("/missing-route"), "", Some(callback))
        .await
        .expect_err("axum 404 has an empty body");

    assert!(matches!(err, PostError::MalformedResponseBody { status: 404, .. }));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn e2e_refused_connection_is_malformed_with_status_zero() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let poster = HttpPoster::new();
    let err = poster
        .post_envelope(format!("http://{addr}/gone"), "")
        .await
        .expect_err("nothing listens on a dropped port");
    assert_eq!(err.status(), Some(0));
}

#[tokio::test]
async fn e2e_slow_and_fast_posts_complete_independently() {
    let server = TestServer::start().await;
    let poster = HttpPoster::new();
    let (slow_rx, slow_callback) = capture();
    let (fast_rx, fast_callback) = capture();

    let slow = poster.post(server.url("/slow"), "", Some(slow_callback));
    let fast = poster.post(server.url("/echo"), "{}", Some(fast_callback));

    fast.await.expect("fast post should complete");
    assert!(!slow.is_finished());
    slow.await.expect("slow post should complete");

    assert_eq!(fast_rx.await.expect("fast callback").status(), 200);
    assert_eq!(slow_rx.await.expect("slow callback").status(), 200);
}

struct TestServer {
    base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let app = Router::new()
            .route("/echo", post(echo_handler))
            .route("/length", post(length_handler))
            .route("/forbidden", post(forbidden_handler))
            .route("/slow", post(slow_handler));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{}", addr);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url, task }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn echo_handler(body: Bytes) -> (StatusCode, Bytes) {
    (StatusCode::OK, body)
}

async fn length_handler(headers: HeaderMap, body: Bytes) -> (StatusCode, String) {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    (
        StatusCode::OK,
        format!(
            r#"{{"length":{},"content_type":"{}"}}"#,
            body.len(),
            content_type
        ),
    )
}

async fn forbidden_handler() -> (StatusCode, &'static str) {
    (StatusCode::FORBIDDEN, r#"{"error":"not logged in"}"#)
}

async fn slow_handler() -> (StatusCode, &'static str) {
    tokio::time::sleep(Duration::from_millis(300)).await;
    (StatusCode::OK, r#"{"slow":true}"#)
}
