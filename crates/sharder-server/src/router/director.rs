//! Director
//!
//! Per-request routing decision: extract the shard key from the decoded path,
//! resolve it on the ring, and point the request URI at the owning node. Only
//! scheme and authority change; path and query are forwarded still encoded.

use crate::sharding::{Membership, Node, ShardError, ShardKeyExtractor};
use axum::http::{uri::Scheme, Uri};
use percent_encoding::percent_decode_str;
use std::sync::Arc;

pub struct Director {
    extractor: ShardKeyExtractor,
    membership: Arc<Membership>,
    scheme: Scheme,
}

impl Director {
    pub fn new(extractor: ShardKeyExtractor, membership: Arc<Membership>, scheme: Scheme) -> Self {
        Self {
            extractor,
            membership,
            scheme,
        }
    }

    /// Pick the backend for `uri` and return it with the rewritten target.
    pub async fn direct(&self, uri: &Uri) -> Result<(Node, Uri), ShardError> {
        let path = percent_decode_str(uri.path()).decode_utf8_lossy();
        let key = self.extractor.extract(&path);
        let node = self.membership.resolve(key).await?;

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let target = Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(node.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|source| ShardError::InvalidTarget {
                node: node.clone(),
                source,
            })?;

        Ok((node, target))
    }
}
