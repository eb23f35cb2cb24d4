use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HELLO: &str = "/hello";
pub const PATH_JSON: &str = "/json";
pub const PATH_ECHO: &str = "/echo";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_LOGIN: &str = "/login";
pub const PATH_WHOAMI: &str = "/whoami";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    saw_test_header: Arc<AtomicU64>,
    saw_json_content_type: Arc<AtomicU64>,
}

impl TestServerStats {
    fn observe(&self, headers: &HeaderMap) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if headers.get("x-test").and_then(|v| v.to_str().ok()) == Some("1") {
            self.saw_test_header.fetch_add(1, Ordering::Relaxed);
        }
        if headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/json"))
        {
            self.saw_json_content_type.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn saw_test_header(&self) -> u64 {
        self.saw_test_header.load(Ordering::Relaxed)
    }

    pub fn saw_json_content_type(&self) -> u64 {
        self.saw_json_content_type.load(Ordering::Relaxed)
    }
}

async fn handle_hello(State(stats): State<TestServerStats>, headers: HeaderMap) -> &'static str {
    stats.observe(&headers);
    "Hello World!"
}

async fn handle_json(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
) -> impl IntoResponse {
    stats.observe(&headers);
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"token":"abc123","user":{"id":42,"name":"ada"},"items":[1,2,3]}"#,
    )
}

async fn handle_echo(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    stats.observe(&headers);

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body)
}

async fn handle_slow(State(stats): State<TestServerStats>, headers: HeaderMap) -> &'static str {
    stats.observe(&headers);
    sleep(Duration::from_millis(50)).await;
    "slow"
}

async fn handle_login(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
) -> impl IntoResponse {
    stats.observe(&headers);
    (
        [(header::SET_COOKIE, "sid=s-123; Path=/; HttpOnly")],
        "ok",
    )
}

/// Echoes the request's `cookie` header so tests can assert the jar.
async fn handle_whoami(State(stats): State<TestServerStats>, headers: HeaderMap) -> String {
    stats.observe(&headers);
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HELLO, get(handle_hello))
        .route(PATH_JSON, get(handle_json))
        .route(PATH_ECHO, post(handle_echo))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_LOGIN, get(handle_login))
        .route(PATH_WHOAMI, get(handle_whoami))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
