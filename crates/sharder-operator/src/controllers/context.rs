//! Shared controller context

use sharder_core::store::ClusterObjectStore;
use std::sync::Arc;

/// Shared context for every reconcile.
pub struct Context {
    pub store: Arc<dyn ClusterObjectStore>,
    /// Image the router fleet runs.
    pub sharder_image: String,
}

impl Context {
    pub fn new(store: Arc<dyn ClusterObjectStore>, sharder_image: impl Into<String>) -> Self {
        Self {
            store,
            sharder_image: sharder_image.into(),
        }
    }
}
