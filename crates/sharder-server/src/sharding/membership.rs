//! Membership Tracker
//!
//! Owns the current node set and the hash ring built from it. Resolution takes
//! a shared lock so concurrent requests never block each other; membership
//! changes take the exclusive lock, so a reader sees the ring either wholly
//! before or wholly after an update.

use super::{HashRing, Node, ShardError};
use crate::metrics;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Incremental changes needed to move from one node set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: BTreeSet<Node>,
    pub to_remove: BTreeSet<Node>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute `(next - current, current - next)`.
pub fn difference(current: &BTreeSet<Node>, next: &BTreeSet<Node>) -> MembershipDiff {
    MembershipDiff {
        to_add: next.difference(current).cloned().collect(),
        to_remove: current.difference(next).cloned().collect(),
    }
}

struct State {
    current: BTreeSet<Node>,
    ring: HashRing,
}

pub struct Membership {
    replicas: usize,
    state: RwLock<State>,
}

impl Membership {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            state: RwLock::new(State {
                current: BTreeSet::new(),
                ring: HashRing::new(replicas),
            }),
        }
    }

    /// Resolve a shard key to the node that owns it.
    pub async fn resolve(&self, key: &str) -> Result<Node, ShardError> {
        let state = self.state.read().await;
        state
            .ring
            .resolve(key)
            .cloned()
            .ok_or(ShardError::NoNodesAvailable)
    }

    /// Replace the membership wholesale, rebuilding the ring.
    pub async fn set_members(&self, nodes: BTreeSet<Node>) {
        let ring = HashRing::with_nodes(self.replicas, nodes.iter().cloned());

        let mut state = self.state.write().await;
        info!(members = nodes.len(), "Initializing shard membership");
        metrics::set_member_count(nodes.len());
        state.ring = ring;
        state.current = nodes;
    }

    /// Converge onto `nodes`, touching only the nodes that changed.
    pub async fn update_members(&self, nodes: BTreeSet<Node>) -> MembershipDiff {
        let mut state = self.state.write().await;
        let diff = difference(&state.current, &nodes);

        if diff.is_empty() {
            debug!(members = nodes.len(), "Shard membership unchanged");
            return diff;
        }

        for node in &diff.to_remove {
            state.ring.remove(node);
        }
        for node in &diff.to_add {
            state.ring.add(node.clone());
        }
        state.current = nodes;

        info!(
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            members = state.current.len(),
            "Shard membership updated"
        );
        metrics::record_membership_change(diff.to_add.len(), diff.to_remove.len());
        metrics::set_member_count(state.current.len());

        diff
    }

    /// Snapshot of the current node set.
    pub async fn members(&self) -> Vec<Node> {
        self.state.read().await.current.iter().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.current.is_empty()
    }
}
