//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::AppState;

/// Liveness probe. Always succeeds while the process is running.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Readiness probe. Verifies database connectivity.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "unavailable"})))
        },
    }
}
