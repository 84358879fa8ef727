//! Cluster object store
//!
//! The single seam between the sharder and the cluster API. The router uses
//! it to discover backend endpoints; the reconciler uses it to list declared
//! `Sharded` resources and converge Deployments and Services.

mod kubernetes;
mod memory;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, Write, WriteOp};

use crate::crds::Sharded;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message),
            other => StoreError::Kube(other),
        }
    }
}

/// Get/create/update access to the cluster objects the sharder manages.
///
/// Writes are optimistic: an update carries the resource version it was read
/// at and fails with [`StoreError::Conflict`] if the object moved underneath.
#[async_trait]
pub trait ClusterObjectStore: Send + Sync {
    /// List every declared `Sharded` resource visible to this store.
    async fn list_sharded(&self) -> Result<Vec<Sharded>, StoreError>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, StoreError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError>;

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, StoreError>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError>;

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError>;

    /// Ready `ip:port` addresses behind the named service.
    async fn endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, StoreError>;
}
