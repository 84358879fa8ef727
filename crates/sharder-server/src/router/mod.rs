//! Request Router
//!
//! The proxy surface: every inbound request goes through the [`Director`],
//! which picks a backend by shard key, and is then forwarded as-is.

mod director;
mod proxy;

pub use director::Director;
pub use proxy::{forward, ProxyState};

use axum::Router;

/// Build the proxy router. Every path is forwarded.
pub fn create_router(state: ProxyState) -> Router {
    Router::new().fallback(forward).with_state(state)
}
