#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use metron_server::app;
use metron_server::service::MetricsService;
use metron_server::state::{AppState, Ingress};
use metron_storage::snapshot::FileSnapshot;
use metron_storage::Storage;
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    pub fn snapshot_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("metrics-db.json")
    }
}

/// In-memory storage, a synchronous snapshot file and no ingress checks.
pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(Ingress::default())
}

pub fn build_test_context_with(ingress: Ingress) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let file = FileSnapshot::new(temp_dir.path().join("metrics-db.json"));
    let service = MetricsService::new(Storage::memory(), Some(file), Duration::ZERO);
    let state = AppState::new(service, ingress);
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: &Value) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

/// Posts raw bytes with extra headers.
pub async fn request_raw(
    app: &axum::Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body)).expect("request should build");
    send(app, req).await
}
