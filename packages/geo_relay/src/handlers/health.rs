use axum::{Json, extract::State, response::IntoResponse};

use crate::RelayState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let has_position = state.store.get().await.valid;
    let metrics = state.metrics.snapshot();

    Json(metrics::HealthStatus {
        status: if has_position { "healthy" } else { "waiting" }.to_string(),
        has_position,
        consumers: state.registry.len().await as u64,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
