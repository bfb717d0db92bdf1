use axum::{Json, extract::State, response::IntoResponse};

use ::presence::wire::HealthResponse;

use crate::AppState;

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Metrics endpoint - returns server counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let online = state.directory.len().await as u64;
    Json(state.metrics.snapshot(online))
}
