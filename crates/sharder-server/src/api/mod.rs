//! Admin HTTP API
//!
//! Served on a separate listener so every path on the proxy listener can be
//! forwarded untouched.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `members`: Current ring membership and build info

mod health;
mod members;
mod metrics;
mod state;

pub use state::AppState;

use axum::{routing::get, Router};

/// Create the admin router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/members", get(members::get_members))
        .route("/version", get(members::get_version))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::{Membership, Node};
    use axum::{body::Body, http::Request, http::StatusCode};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_tracks_membership() {
        let membership = Arc::new(Membership::new(16));
        let app = create_router(AppState::new(membership.clone(), None));

        let (status, _) = get_path(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        membership
            .set_members(BTreeSet::from([Node::parse("a:80").unwrap()]))
            .await;
        let (status, body) = get_path(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");

        let (status, _) = get_path(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_members_lists_nodes() {
        let membership = Arc::new(Membership::new(16));
        membership
            .set_members(BTreeSet::from([
                Node::parse("b:80").unwrap(),
                Node::parse("a:80").unwrap(),
            ]))
            .await;
        let app = create_router(AppState::new(membership, None));

        let (status, body) = get_path(app.clone(), "/members").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["members"], serde_json::json!(["a:80", "b:80"]));

        let (status, _) = get_path(app, "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_version_reports_build_info() {
        let app = create_router(AppState::new(Arc::new(Membership::new(16)), None));

        let (status, body) = get_path(app, "/version").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["version"], crate::version::VERSION);
        assert_eq!(json["rustc_version"], crate::version::RUSTC_VERSION);
    }
}
