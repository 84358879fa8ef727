//! Core shared types for the sharder
//!
//! Holds the pieces used by both the router (`sharder-server`) and the fleet
//! reconciler (`sharder-operator`): the `Sharded` custom resource, the
//! `ClusterObjectStore` seam over the Kubernetes API, and tracing setup.

pub mod crds;
pub mod shutdown;
pub mod store;
pub mod telemetry;

pub use crds::{Sharded, ShardedSpec, SpecValidationError};
pub use store::{ClusterObjectStore, KubeStore, MemoryStore, StoreError};
