//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers for Kubernetes.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};

/// Liveness probe endpoint. The process answering is enough.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe endpoint. Ready once at least one backend is on the ring.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.membership.is_empty().await {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        Ok("READY")
    }
}
