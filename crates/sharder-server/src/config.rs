//! Router Configuration
//!
//! Command-line flags with environment variable fallbacks.

use crate::discovery::AddressSource;
use crate::sharding::{ShardKeyExtractor, DEFAULT_REPLICAS};
use anyhow::{bail, Context, Result};
use axum::http::uri::Scheme;
use clap::Parser;
use sharder_core::store::ClusterObjectStore;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "sharder-server")]
#[command(about = "Consistent-hashing HTTP router for a sharded service")]
pub struct Config {
    /// The <host>:<port> to serve proxied traffic on
    #[arg(long, env = "SHARDER_ADDRESS", default_value = "0.0.0.0:8080")]
    pub address: SocketAddr,

    /// The <host>:<port> for health, readiness and metrics
    #[arg(long, env = "SHARDER_ADMIN_ADDRESS", default_value = "0.0.0.0:9090")]
    pub admin_address: SocketAddr,

    /// The list of addresses to shard to (comma-separated)
    #[arg(long, env = "SHARDER_ADDRESSES", value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// The <namespace>/<name> of a Kubernetes service to shard to
    #[arg(long, env = "SHARDER_KUBERNETES_SERVICE", default_value = "")]
    pub kubernetes_service: String,

    /// Namespace of the service when --kubernetes-service has none
    #[arg(long, env = "SHARDER_KUBERNETES_NAMESPACE", default_value = "default")]
    pub kubernetes_namespace: String,

    /// Path sharding expression; the first group is the shard key. Empty uses the whole path.
    #[arg(long, env = "SHARDER_PATH_SHARD_EXPRESSION", default_value = "")]
    pub path_shard_expression: String,

    /// Scheme used to reach backends
    #[arg(long, env = "SHARDER_SCHEME", default_value = "http")]
    pub scheme: String,

    /// Seconds between backend discovery refreshes
    #[arg(long, env = "SHARDER_DISCOVERY_INTERVAL_SECS", default_value_t = 5)]
    pub discovery_interval_secs: u64,

    /// Seconds to keep retrying the first discovery before giving up
    #[arg(long, env = "SHARDER_STARTUP_TIMEOUT_SECS", default_value_t = 60)]
    pub startup_timeout_secs: u64,

    /// Virtual points per backend on the hash ring
    #[arg(long, env = "SHARDER_RING_REPLICAS", default_value_t = DEFAULT_REPLICAS)]
    pub replicas: usize,
}

/// Where the backend set comes from, before any client is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Static(Vec<String>),
    Service { namespace: String, name: String },
}

impl Config {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn scheme(&self) -> Result<Scheme> {
        Scheme::from_str(&self.scheme).with_context(|| format!("invalid scheme {:?}", self.scheme))
    }

    pub fn key_extractor(&self) -> Result<ShardKeyExtractor> {
        ShardKeyExtractor::new(&self.path_shard_expression).with_context(|| {
            format!(
                "invalid --path-shard-expression {:?}",
                self.path_shard_expression
            )
        })
    }

    pub fn source_spec(&self) -> Result<SourceSpec> {
        let addresses: Vec<String> = self
            .addresses
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();

        match (addresses.is_empty(), self.kubernetes_service.is_empty()) {
            (false, true) => Ok(SourceSpec::Static(addresses)),
            (true, false) => {
                let (namespace, name) = match self.kubernetes_service.split_once('/') {
                    Some((ns, name)) => (ns.to_string(), name.to_string()),
                    None => (
                        self.kubernetes_namespace.clone(),
                        self.kubernetes_service.clone(),
                    ),
                };
                if namespace.is_empty() || name.is_empty() {
                    bail!("invalid --kubernetes-service {:?}", self.kubernetes_service);
                }
                Ok(SourceSpec::Service { namespace, name })
            }
            (false, false) => bail!("--addresses and --kubernetes-service are mutually exclusive"),
            (true, true) => bail!("Either --addresses or --kubernetes-service are required"),
        }
    }
}

impl SourceSpec {
    /// Build the address source; `store` is only consulted for service sources.
    pub fn into_source(
        self,
        store: Option<Arc<dyn ClusterObjectStore>>,
    ) -> Result<AddressSource> {
        match self {
            SourceSpec::Static(addresses) => {
                Ok(AddressSource::from_addresses(&addresses).context("invalid --addresses")?)
            }
            SourceSpec::Service { namespace, name } => {
                let store = store.context("service discovery needs a cluster store")?;
                Ok(AddressSource::Endpoints {
                    store,
                    namespace,
                    service: name,
                })
            }
        }
    }
}
