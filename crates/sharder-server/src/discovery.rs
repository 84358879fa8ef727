//! Backend Discovery
//!
//! Periodically asks an address source for the current backend set and feeds
//! it to the [`Membership`] tracker. A failed refresh keeps the previous
//! membership and is retried on the next tick.

use crate::metrics;
use crate::sharding::{InvalidNode, Membership, MembershipDiff, Node};
use backoff::{future::retry, ExponentialBackoff};
use sharder_core::store::{ClusterObjectStore, StoreError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("endpoint lookup failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidAddress(#[from] InvalidNode),
}

/// Where backend addresses come from.
pub enum AddressSource {
    /// A fixed list given at startup.
    Static(BTreeSet<Node>),
    /// The ready endpoints of a Kubernetes service.
    Endpoints {
        store: Arc<dyn ClusterObjectStore>,
        namespace: String,
        service: String,
    },
}

impl AddressSource {
    /// Parse a static address list.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self, InvalidNode> {
        let nodes = addresses
            .iter()
            .map(|a| Node::parse(a.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self::Static(nodes))
    }

    /// Only endpoint-backed sources change at runtime.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, AddressSource::Endpoints { .. })
    }

    pub async fn fetch(&self) -> Result<BTreeSet<Node>, DiscoveryError> {
        match self {
            AddressSource::Static(nodes) => Ok(nodes.clone()),
            AddressSource::Endpoints {
                store,
                namespace,
                service,
            } => {
                let addresses = store.endpoint_addresses(namespace, service).await?;
                let nodes = addresses
                    .iter()
                    .map(|a| Node::parse(a))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                if nodes.is_empty() {
                    warn!(namespace = %namespace, service = %service, "Service has no ready endpoints");
                }
                Ok(nodes)
            }
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSource::Static(nodes) => write!(f, "static({} addresses)", nodes.len()),
            AddressSource::Endpoints {
                namespace, service, ..
            } => write!(f, "endpoints({namespace}/{service})"),
        }
    }
}

/// Fetch the startup membership, retrying transient lookup failures with
/// exponential backoff until `max_elapsed` runs out.
pub async fn initial_members(
    source: &AddressSource,
    max_elapsed: Duration,
) -> Result<BTreeSet<Node>, DiscoveryError> {
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    };

    retry(policy, || async {
        source.fetch().await.map_err(|e| match e {
            DiscoveryError::InvalidAddress(_) => backoff::Error::permanent(e),
            DiscoveryError::Store(_) => {
                warn!(source = %source, error = %e, "Initial discovery failed, retrying");
                backoff::Error::transient(e)
            }
        })
    })
    .await
}

/// Run one refresh: fetch, then converge membership.
pub async fn refresh_once(
    source: &AddressSource,
    membership: &Membership,
) -> Result<MembershipDiff, DiscoveryError> {
    let nodes = source.fetch().await?;
    Ok(membership.update_members(nodes).await)
}

/// Refresh membership every `interval` until `shutdown` flips.
///
/// Ticks never overlap; a slow refresh delays the next one.
pub async fn run_refresh_loop(
    source: AddressSource,
    membership: Arc<Membership>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first immediate tick

    info!(source = %source, interval_secs = interval.as_secs(), "Starting discovery refresh loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                debug!("Discovery refresh loop shutting down");
                return;
            }
        }

        match refresh_once(&source, &membership).await {
            Ok(diff) if !diff.is_empty() => {
                info!(
                    added = ?diff.to_add,
                    removed = ?diff.to_remove,
                    "Sharder updating backend set"
                );
            }
            Ok(_) => {}
            Err(e) => {
                metrics::record_discovery_failure();
                warn!(source = %source, error = %e, "Error getting addresses, keeping previous membership");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharder_core::MemoryStore;

    fn endpoints_source(store: Arc<MemoryStore>) -> AddressSource {
        AddressSource::Endpoints {
            store,
            namespace: "default".to_string(),
            service: "web-delegate".to_string(),
        }
    }

    #[test]
    fn test_static_source_parses_addresses() {
        let source = AddressSource::from_addresses(&["http://a:80", "b:80"]).unwrap();
        assert!(!source.is_dynamic());
        assert!(AddressSource::from_addresses(&["not a host"]).is_err());
    }

    #[tokio::test]
    async fn test_refresh_applies_endpoint_changes() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints(
            "default",
            "web-delegate",
            vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()],
        );
        let source = endpoints_source(store.clone());
        let membership = Membership::new(64);

        let diff = refresh_once(&source, &membership).await.unwrap();
        assert_eq!(diff.to_add.len(), 2);

        store.set_endpoints(
            "default",
            "web-delegate",
            vec!["10.0.0.2:80".to_string(), "10.0.0.3:80".to_string()],
        );
        let diff = refresh_once(&source, &membership).await.unwrap();
        assert_eq!(diff.to_add, BTreeSet::from([Node::parse("10.0.0.3:80").unwrap()]));
        assert_eq!(diff.to_remove, BTreeSet::from([Node::parse("10.0.0.1:80").unwrap()]));
    }

    #[tokio::test]
    async fn test_refresh_accepts_ipv6_endpoints() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints(
            "default",
            "web-delegate",
            vec!["10.0.0.1:80".to_string(), "[fd00:10:244::5]:80".to_string()],
        );
        let membership = Membership::new(64);

        let diff = refresh_once(&endpoints_source(store), &membership).await.unwrap();
        assert_eq!(diff.to_add.len(), 2);
        assert!(membership
            .members()
            .await
            .contains(&Node::parse("[fd00:10:244::5]:80").unwrap()));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_membership() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints("default", "web-delegate", vec!["10.0.0.1:80".to_string()]);
        let source = endpoints_source(store.clone());
        let membership = Membership::new(64);
        refresh_once(&source, &membership).await.unwrap();

        store.fail_object("web-delegate");
        assert!(refresh_once(&source, &membership).await.is_err());
        assert_eq!(membership.members().await.len(), 1);

        store.set_endpoints("default", "web-delegate", vec!["garbage address".to_string()]);
        store.heal_object("web-delegate");
        let err = refresh_once(&source, &membership).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidAddress(_)));
        assert_eq!(membership.members().await.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_endpoints_keep_membership() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints("default", "web-delegate", vec!["10.0.0.1:80".to_string()]);
        let source = endpoints_source(store.clone());
        let membership = Membership::new(64);
        refresh_once(&source, &membership).await.unwrap();

        store.remove_endpoints("default", "web-delegate");
        let err = refresh_once(&source, &membership).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Store(StoreError::NotFound(_))));
        assert_eq!(membership.members().await.len(), 1);

        // An existing but empty endpoint set drains the ring.
        store.set_endpoints("default", "web-delegate", Vec::new());
        refresh_once(&source, &membership).await.unwrap();
        assert!(membership.is_empty().await);
    }

    #[tokio::test]
    async fn test_initial_members_gives_up_on_invalid_address() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints("default", "web-delegate", vec!["bad address".to_string()]);
        let source = endpoints_source(store);

        let err = initial_members(&source, Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidAddress(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints("default", "web-delegate", vec!["10.0.0.1:80".to_string()]);
        let membership = Arc::new(Membership::new(64));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_refresh_loop(
            endpoints_source(store),
            membership.clone(),
            Duration::from_secs(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(membership.members().await.len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
