//! Application State
//!
//! Shared state passed to all admin handlers.

use crate::metrics::MetricsState;
use crate::sharding::Membership;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub membership: Arc<Membership>,
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn new(membership: Arc<Membership>, metrics_state: Option<MetricsState>) -> Self {
        Self {
            membership,
            metrics_state,
        }
    }
}
