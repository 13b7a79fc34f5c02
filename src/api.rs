// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP control API — runs alongside the generator manager.
//!
//! Endpoints:
//!   GET    /api/status                    → system status (JSON)
//!   GET    /api/streams                    → list active streams
//!   POST   /api/streams                    → add a stream (hot)
//!   DELETE /api/streams/{id}               → remove a stream (hot)
//!   GET    /api/streams/{id}/manifest      → current manifest JSON
//!   POST   /api/streams/{id}/ping          → liveness ping

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::config::StreamConfig;
use crate::manager::GeneratorManager;

/// Shared state passed to all handlers.
pub struct AppState {
    pub manager: Arc<GeneratorManager>,
}

#[derive(Serialize)]
struct StatusResponse {
    streams: usize,
}

#[derive(Serialize)]
struct StreamSummary {
    id: String,
    playlist_url: String,
}

#[derive(Serialize)]
struct StreamListResponse {
    streams: Vec<StreamSummary>,
    total: usize,
}

#[derive(Deserialize)]
struct RemoveParams {
    #[serde(default)]
    keep_files: bool,
}

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/streams", get(handle_list_streams).post(handle_add_stream))
        .route("/api/streams/{id}", delete(handle_remove_stream))
        .route("/api/streams/{id}/manifest", get(handle_manifest))
        .route("/api/streams/{id}/ping", post(handle_ping))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    tracing::info!(port, "HTTP control API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = StatusResponse { streams: state.manager.stream_count() };
    (StatusCode::OK, axum::Json(resp))
}

async fn handle_list_streams(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let streams: Vec<StreamSummary> = state
        .manager
        .list_streams()
        .into_iter()
        .map(|(id, playlist_url)| StreamSummary { id, playlist_url })
        .collect();
    let total = streams.len();
    (StatusCode::OK, axum::Json(StreamListResponse { streams, total }))
}

async fn handle_add_stream(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StreamConfig>,
) -> impl IntoResponse {
    if let Err(e) = body.validate() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response();
    }

    match state.manager.add_stream(body) {
        Ok(id) => (
            StatusCode::CREATED,
            axum::Json(serde_json::json!({ "status": "added", "id": id })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_remove_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    axum::extract::Query(params): axum::extract::Query<RemoveParams>,
) -> impl IntoResponse {
    match state.manager.remove_stream(&id, params.keep_files).await {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "status": "removed", "id": id })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_manifest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.manifest(&id) {
        Ok(manifest) => (StatusCode::OK, axum::Json(manifest)).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_ping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.ping(&id).await {
        Ok(()) => (StatusCode::OK, axum::Json(serde_json::json!({ "status": "pinged" }))).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
