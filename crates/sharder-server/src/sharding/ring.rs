//! Consistent Hash Ring
//!
//! Each node is placed on a 64-bit ring at many virtual points. A key belongs
//! to the first point at or after its own hash, wrapping around at the end.
//!
//! Properties:
//! - Deterministic: the point layout depends only on the node set, never on
//!   the order nodes were added in
//! - Minimal disruption: adding or removing a node only moves keys that land
//!   on that node's points
//! - Even: with enough virtual points each node owns close to 1/n of the ring

use super::Node;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Default number of virtual points per node.
pub const DEFAULT_REPLICAS: usize = 1024;

#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    nodes: BTreeSet<Node>,
    /// Virtual points sorted by (hash, node).
    points: Vec<(u64, Node)>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            nodes: BTreeSet::new(),
            points: Vec::new(),
        }
    }

    pub fn with_nodes(replicas: usize, nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut ring = Self::new(replicas);
        for node in nodes {
            ring.add(node);
        }
        ring
    }

    /// Find the node owning `key`. Returns None if the ring is empty.
    pub fn resolve(&self, key: &str) -> Option<&Node> {
        let hash = hash_key(key);
        let idx = self.points.partition_point(|(point, _)| *point < hash);

        self.points
            .get(idx)
            .or_else(|| self.points.first())
            .map(|(_, node)| node)
    }

    /// Place a node on the ring. Adding a present node is a no-op.
    pub fn add(&mut self, node: Node) {
        if self.nodes.contains(&node) {
            return;
        }

        self.points.reserve(self.replicas);
        for i in 0..self.replicas {
            let point = hash_key(&format!("{node}#{i}"));
            self.points.push((point, node.clone()));
        }
        self.points.sort_unstable();
        self.nodes.insert(node);
    }

    /// Take a node off the ring. Removing an absent node is a no-op.
    pub fn remove(&mut self, node: &Node) {
        if self.nodes.remove(node) {
            self.points.retain(|(_, n)| n != node);
        }
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.contains(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

/// Hash a key using SipHash (via DefaultHasher).
fn hash_key(key: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
