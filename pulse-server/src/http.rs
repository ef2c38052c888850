//! Pulse HTTP REST API
//!
//! Axum server exposing dataset loading and dashboard rendering. Runs next to
//! the Unix socket IPC server on port 8766 (configurable).
//!
//! Each endpoint is a thin axum handler delegating to an inner function that
//! returns `(StatusCode, serde_json::Value)`, so the logic is testable without
//! going through the router.
//!
//! Endpoints:
//! - GET  /health                  health check with cache stats
//! - GET  /version                 server version info
//! - POST /datasets                upload a raw CSV body
//! - POST /datasets/load           load a CSV from a server-side path
//! - GET  /datasets/:key/options   filter choices for a dataset
//! - POST /datasets/:key/render    dashboard view for a dataset and filters

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use pulse_core::{FilterParams, PulseError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let limit = state.config.http.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/datasets", post(upload_handler))
        .route("/datasets/load", post(load_path_handler))
        .route("/datasets/:key/options", get(options_handler))
        .route("/datasets/:key/render", post(render_handler))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Pulse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct LoadPathRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

/// 404 for unknown datasets and missing files, 400 for bad input, else 500.
pub fn error_status(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<PulseError>() {
        Some(PulseError::UnknownDataset(_)) => StatusCode::NOT_FOUND,
        Some(PulseError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND
        }
        Some(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: Result<T>) -> (StatusCode, serde_json::Value) {
    match result.and_then(|v| Ok(serde_json::to_value(v)?)) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            let status = error_status(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!("Request failed: {:#}", e);
            } else {
                tracing::debug!("Rejected request: {}", e);
            }
            let body = serde_json::to_value(ErrorResponse::new(e.to_string()))
                .unwrap_or_else(|_| serde_json::json!({"status": "error"}));
            (status, body)
        }
    }
}

pub fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    (StatusCode::OK, router::health_body(state))
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "pulse/1",
    })
}

pub async fn upload_inner(state: &Arc<AppState>, body: Bytes) -> (StatusCode, serde_json::Value) {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "request body must contain CSV data",
                "status": "error",
            }),
        );
    }
    reply(router::blocking(state, move |s| router::load_bytes(s, &body)).await)
}

pub async fn load_path_inner(
    state: &Arc<AppState>,
    req: LoadPathRequest,
) -> (StatusCode, serde_json::Value) {
    if req.path.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "path field is required",
                "status": "error",
            }),
        );
    }
    reply(router::blocking(state, move |s| router::load_path(s, req.path.trim())).await)
}

pub fn options_inner(state: &AppState, key: &str) -> (StatusCode, serde_json::Value) {
    reply(router::dataset_options(state, key))
}

pub async fn render_inner(
    state: &Arc<AppState>,
    key: String,
    params: FilterParams,
) -> (StatusCode, serde_json::Value) {
    let start = Instant::now();
    let (status, mut body) =
        reply(router::blocking(state, move |s| router::render_dataset(s, &key, &params)).await);
    if status == StatusCode::OK {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "took_ms".to_string(),
                serde_json::json!(start.elapsed().as_millis() as u64),
            );
        }
    }
    (status, body)
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = upload_inner(&state, body).await;
    (status, Json(body))
}

pub async fn load_path_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadPathRequest>,
) -> impl IntoResponse {
    let (status, body) = load_path_inner(&state, req).await;
    (status, Json(body))
}

pub async fn options_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let (status, body) = options_inner(&state, &key);
    (status, Json(body))
}

pub async fn render_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(params): Json<FilterParams>,
) -> impl IntoResponse {
    let (status, body) = render_inner(&state, key, params).await;
    (status, Json(body))
}
