//! Sharding Module
//!
//! Maps request keys onto backend nodes with a consistent hash ring.
//!
//! ## Architecture
//!
//! ```text
//! request path
//!      ↓
//! ShardKeyExtractor.extract()
//!      ↓
//! Membership.resolve()  ←── Membership.update_members()  ←── discovery loop
//!      ↓
//! HashRing.resolve()
//!      ↓
//!    Node
//! ```
//!
//! The ring is owned by [`Membership`]; nothing outside it can mutate the
//! ring directly.

mod key;
mod membership;
mod node;
mod ring;

pub use key::ShardKeyExtractor;
pub use membership::{difference, Membership, MembershipDiff};
pub use node::{InvalidNode, Node};
pub use ring::{HashRing, DEFAULT_REPLICAS};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("no backend nodes available")]
    NoNodesAvailable,
    #[error("cannot build target uri for {node}: {source}")]
    InvalidTarget {
        node: Node,
        #[source]
        source: axum::http::Error,
    },
}
