//! Backend node addresses

use axum::http::uri::Authority;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid backend address {0:?}")]
pub struct InvalidNode(pub String);

/// A backend address (`host:port`). Identity is the address string.
///
/// Cheap to clone; the ring holds many virtual points per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node(Arc<str>);

impl Node {
    /// Parse an address, accepting an optional `scheme://` prefix which is
    /// discarded. The forwarding scheme is configured on the router.
    pub fn parse(raw: &str) -> Result<Self, InvalidNode> {
        let trimmed = raw.trim();
        let without_scheme = match trimmed.split_once("://") {
            Some((_, rest)) => rest,
            None => trimmed,
        };
        let address = without_scheme.trim_end_matches('/');

        if address.is_empty() || address.contains('/') {
            return Err(InvalidNode(raw.to_string()));
        }
        Authority::from_str(address).map_err(|_| InvalidNode(raw.to_string()))?;

        Ok(Self(Arc::from(address)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Node {
    type Err = InvalidNode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
