//! In-process stand-ins for the Ollama HTTP API and the ollama binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
pub struct FakeOllama {
    pub tags_hits: Arc<AtomicUsize>,
    /// Number of `/api/tags` calls answered with 503 before succeeding.
    pub unavailable_probes: Arc<AtomicUsize>,
    pub models: Arc<Vec<String>>,
    /// Raw body returned by the POST endpoints.
    pub body: Arc<String>,
    pub status: Arc<AtomicUsize>,
    /// Pause before the POST endpoints send headers.
    pub delay: Duration,
    /// Keep the POST body open after `body` is sent.
    pub stall: bool,
}

impl FakeOllama {
    pub fn with_models(models: &[&str]) -> Self {
        Self {
            models: Arc::new(models.iter().map(|m| m.to_string()).collect()),
            status: Arc::new(AtomicUsize::new(200)),
            ..Default::default()
        }
    }

    pub fn unavailable_for(self, probes: usize) -> Self {
        self.unavailable_probes.store(probes, Ordering::SeqCst);
        self
    }

    pub fn responding(mut self, status: u16, body: &str) -> Self {
        self.status = Arc::new(AtomicUsize::new(status as usize));
        self.body = Arc::new(body.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn hits(&self) -> usize {
        self.tags_hits.load(Ordering::SeqCst)
    }

    /// Serve on an ephemeral port. Returns the port.
    pub async fn spawn(&self) -> u16 {
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/chat", post(respond))
            .route("/api/generate", post(respond))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }
}

async fn tags(State(state): State<FakeOllama>) -> Response {
    state.tags_hits.fetch_add(1, Ordering::SeqCst);

    let pending = state.unavailable_probes.load(Ordering::SeqCst);
    if pending > 0 {
        state.unavailable_probes.store(pending - 1, Ordering::SeqCst);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let models: Vec<Value> = state
        .models
        .iter()
        .map(|name| json!({ "name": name, "modified_at": "2024-05-01T10:00:00Z", "size": 1024 }))
        .collect();
    Json(json!({ "models": models })).into_response()
}

async fn respond(State(state): State<FakeOllama>, Json(_body): Json<Value>) -> Response {
    tokio::time::sleep(state.delay).await;
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst) as u16).unwrap();

    if state.stall {
        let first = futures_util::stream::once(async move {
            Ok::<_, std::convert::Infallible>(state.body.as_str().to_string())
        });
        let body = Body::from_stream(futures_util::StreamExt::chain(
            first,
            futures_util::stream::pending(),
        ));
        return (status, [(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response();
    }

    (
        status,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        state.body.as_str().to_string(),
    )
        .into_response()
}

/// A port nothing listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
