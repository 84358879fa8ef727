//! Operator admin endpoints: `/health` and `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;

pub fn create_router(metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

async fn get_metrics(State(metrics): State<Option<PrometheusHandle>>) -> impl IntoResponse {
    match metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}
