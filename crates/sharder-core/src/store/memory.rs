//! In-memory store
//!
//! Behaves like the cluster API for the operations the sharder uses: objects
//! keyed by namespace and name, resource versions checked on update. Every
//! write is recorded so callers can assert exactly what was issued.

use super::{ClusterObjectStore, StoreError};
use crate::crds::Sharded;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Key = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
}

/// A write issued against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub kind: &'static str,
    pub op: WriteOp,
    pub namespace: String,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    sharded: Vec<Sharded>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    endpoints: BTreeMap<Key, Vec<String>>,
    /// Object names whose reads and writes fail.
    failing: BTreeSet<String>,
    fail_listing: bool,
    writes: Vec<Write>,
    next_version: u64,
}

impl Inner {
    fn check(&self, name: &str) -> Result<(), StoreError> {
        if self.failing.contains(name) {
            return Err(StoreError::Unavailable(format!("injected failure for {name}")));
        }
        Ok(())
    }

    fn stamp(&mut self, meta: &mut ObjectMeta, namespace: &str) {
        self.next_version += 1;
        meta.namespace = Some(namespace.to_string());
        meta.resource_version = Some(self.next_version.to_string());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a `Sharded` resource.
    pub fn add_sharded(&self, sharded: Sharded) {
        self.lock().sharded.push(sharded);
    }

    /// Seed a Deployment without recording a write, as if created out of band.
    pub fn seed_deployment(&self, namespace: &str, mut deployment: Deployment) {
        let mut inner = self.lock();
        inner.stamp(&mut deployment.metadata, namespace);
        let name = deployment.name_any();
        inner.deployments.insert(key(namespace, &name), deployment);
    }

    /// Seed a Service without recording a write.
    pub fn seed_service(&self, namespace: &str, mut service: Service) {
        let mut inner = self.lock();
        inner.stamp(&mut service.metadata, namespace);
        let name = service.name_any();
        inner.services.insert(key(namespace, &name), service);
    }

    pub fn set_endpoints(&self, namespace: &str, service: &str, addresses: Vec<String>) {
        self.lock().endpoints.insert(key(namespace, service), addresses);
    }

    pub fn remove_endpoints(&self, namespace: &str, service: &str) {
        self.lock().endpoints.remove(&key(namespace, service));
    }

    /// Make every read and write of objects with this name fail.
    pub fn fail_object(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    pub fn heal_object(&self, name: &str) {
        self.lock().failing.remove(name);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&key(namespace, name)).cloned()
    }

    /// Writes issued since creation or the last [`MemoryStore::take_writes`].
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn take_writes(&self) -> Vec<Write> {
        std::mem::take(&mut self.lock().writes)
    }
}

#[async_trait]
impl ClusterObjectStore for MemoryStore {
    async fn list_sharded(&self) -> Result<Vec<Sharded>, StoreError> {
        let inner = self.lock();
        if inner.fail_listing {
            return Err(StoreError::Unavailable("injected listing failure".to_string()));
        }
        Ok(inner.sharded.clone())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, StoreError> {
        let inner = self.lock();
        inner.check(name)?;
        Ok(inner.deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let name = deployment.name_any();
        inner.check(&name)?;
        if inner.deployments.contains_key(&key(namespace, &name)) {
            return Err(StoreError::Conflict(format!("deployment {namespace}/{name} exists")));
        }

        let mut stored = deployment.clone();
        inner.stamp(&mut stored.metadata, namespace);
        inner.deployments.insert(key(namespace, &name), stored);
        inner.writes.push(Write {
            kind: "Deployment",
            op: WriteOp::Create,
            namespace: namespace.to_string(),
            name,
        });
        Ok(())
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let name = deployment.name_any();
        inner.check(&name)?;
        let current = inner
            .deployments
            .get(&key(namespace, &name))
            .ok_or_else(|| StoreError::NotFound(format!("deployment {namespace}/{name}")))?;
        if current.metadata.resource_version != deployment.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "deployment {namespace}/{name} was modified"
            )));
        }

        let mut stored = deployment.clone();
        inner.stamp(&mut stored.metadata, namespace);
        inner.deployments.insert(key(namespace, &name), stored);
        inner.writes.push(Write {
            kind: "Deployment",
            op: WriteOp::Update,
            namespace: namespace.to_string(),
            name,
        });
        Ok(())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        let inner = self.lock();
        inner.check(name)?;
        Ok(inner.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let name = service.name_any();
        inner.check(&name)?;
        if inner.services.contains_key(&key(namespace, &name)) {
            return Err(StoreError::Conflict(format!("service {namespace}/{name} exists")));
        }

        let mut stored = service.clone();
        inner.stamp(&mut stored.metadata, namespace);
        inner.services.insert(key(namespace, &name), stored);
        inner.writes.push(Write {
            kind: "Service",
            op: WriteOp::Create,
            namespace: namespace.to_string(),
            name,
        });
        Ok(())
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let name = service.name_any();
        inner.check(&name)?;
        let current = inner
            .services
            .get(&key(namespace, &name))
            .ok_or_else(|| StoreError::NotFound(format!("service {namespace}/{name}")))?;
        if current.metadata.resource_version != service.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "service {namespace}/{name} was modified"
            )));
        }

        let mut stored = service.clone();
        inner.stamp(&mut stored.metadata, namespace);
        inner.services.insert(key(namespace, &name), stored);
        inner.writes.push(Write {
            kind: "Service",
            op: WriteOp::Update,
            namespace: namespace.to_string(),
            name,
        });
        Ok(())
    }

    async fn endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        inner.check(service)?;
        inner
            .endpoints
            .get(&key(namespace, service))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("endpoints {namespace}/{service}")))
    }
}
