// =============================================================================
// REST API — thin read surface over the market view
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only. Every endpoint
// always succeeds: upstream failures never surface here, only staleness
// (via each asset's `lastUpdated` and the status payload).
//
// CORS is configured permissively for development; tighten `allow_origin`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/market", get(market))
        .route("/api/v1/status", get(status))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

/// The current best-known view for all four asset buckets. Non-blocking.
async fn market(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.read())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status())
}
