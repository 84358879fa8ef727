//! Membership and build info endpoints

use super::AppState;
use crate::sharding::Node;
use crate::version;
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub count: usize,
    pub members: Vec<Node>,
}

/// GET /members - the node set currently on the ring
#[tracing::instrument(skip(state))]
pub async fn get_members(State(state): State<AppState>) -> Json<MembersResponse> {
    let members = state.membership.members().await;
    Json(MembersResponse {
        count: members.len(),
        members,
    })
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

/// GET /version - build metadata
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::VERSION,
        git_sha: version::GIT_SHA,
        build_timestamp: version::BUILD_TIMESTAMP,
        rustc_version: version::RUSTC_VERSION,
    })
}
