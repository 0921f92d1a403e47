//! Socket-level tests: a throwaway axum backend and the gateway both listen
//! on ephemeral ports and are driven over HTTP with `reqwest`.
//!
//! Run with: `cargo test --test proxy_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::routing::get;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use edge_gateway::auth::TokenRequest;
use edge_gateway::gateway::ServiceTarget;
use edge_gateway::{AppState, Config, build_router};

const SECRET: &str = "thisisaverylongandsecuresecretkeyforjwtauthenticationtesting";

/// Echoes what it received and counts hits.
async fn spawn_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    async fn echo(State(hits): State<Arc<AtomicUsize>>, uri: Uri, headers: HeaderMap) -> axum::Json<Value> {
        hits.fetch_add(1, Ordering::SeqCst);
        axum::Json(json!({
            "path": uri.path(),
            "query": uri.query(),
            "service": headers.get("x-service-name").and_then(|v| v.to_str().ok()),
            "hit": hits.load(Ordering::SeqCst),
        }))
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(3)).await;
        "late"
    }

    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/slow", get(slow))
        .fallback(echo)
        .with_state(hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, hits)
}

/// A local port with nothing listening on it.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

struct Gateway {
    addr: SocketAddr,
    state: AppState,
    client: Client,
}

impl Gateway {
    async fn spawn(services: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: SECRET.to_string(),
            services: ServiceTarget::parse_list(services).unwrap(),
            rate_limit_rps: 0,
            metrics_port: 0,
            ..Config::default()
        };
        tweak(&mut config);

        let state = AppState::new(config).unwrap();
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn bearer(&self) -> String {
        let token = self
            .state
            .validator
            .signing_key()
            .issue(&TokenRequest::new("alice").with_roles(["user"]))
            .unwrap();
        format!("Bearer {token}")
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("authorization", self.bearer())
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_forwarded_request_has_prefix_stripped_and_service_header() {
    let (backend, _) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |_| {}).await;

    let response = gw
        .client
        .get(gw.url("/orders/items/7?expand=true"))
        .header("authorization", gw.bearer())
        .header("x-service-name", "spoofed")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/items/7");
    assert_eq!(echoed["query"], "expand=true");
    assert_eq!(echoed["service"], "orders");
}

#[tokio::test]
async fn test_bare_prefix_forwards_to_root() {
    let (backend, _) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |_| {}).await;

    let echoed: Value = gw.get("/orders").await.json().await.unwrap();
    assert_eq!(echoed["path"], "/");
}

#[tokio::test]
async fn test_repeat_get_served_from_cache() {
    let (backend, hits) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |_| {}).await;

    let first = gw.get("/orders/catalog").await.text().await.unwrap();
    let second = gw.get("/orders/catalog").await.text().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused_serves_fallback() {
    let dead = closed_port().await;
    let gw = Gateway::spawn(&format!("orders=http://{dead}"), |_| {}).await;

    let response = gw.get("/orders/1").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Service 'orders' is currently down or unreachable.");
}

#[tokio::test]
async fn test_slow_backend_times_out_to_fallback() {
    let (backend, _) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |c| {
        c.upstream_timeout = Duration::from_millis(200);
    })
    .await;

    let response = gw.get("/orders/slow").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Service 'orders' timed out.");
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let (backend, _) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |c| {
        c.rate_limit_rps = 1;
        c.rate_limit_burst = 1;
    })
    .await;

    assert_eq!(gw.get("/health").await.status(), StatusCode::OK);

    let limited = gw.get("/health").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("retry-after"));

    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["status"], "429");
}

#[tokio::test]
async fn test_request_id_generated_when_absent() {
    let (backend, _) = spawn_backend().await;
    let gw = Gateway::spawn(&format!("orders=http://{backend}"), |_| {}).await;

    let response = gw.client.get(gw.url("/health")).send().await.unwrap();
    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok(), "{id}");
}
