//! Kubernetes-backed store

use super::{ClusterObjectStore, StoreError};
use crate::crds::Sharded;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{
    api::{Api, ListParams, PostParams},
    Client, ResourceExt,
};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Store backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    /// Restricts `list_sharded` to one namespace when set.
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            namespace: None,
        }
    }

    /// Build a store from in-cluster config or the local kubeconfig.
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Confirm the API server answers with these credentials.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        let info = self.client.apiserver_version().await?;
        debug!(version = %info.git_version, "Connected to Kubernetes API server");
        Ok(())
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterObjectStore for KubeStore {
    async fn list_sharded(&self) -> Result<Vec<Sharded>, StoreError> {
        let api: Api<Sharded> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, StoreError> {
        Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        self.deployments(namespace)
            .replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        Ok(self.services(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        self.services(namespace)
            .create(&PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        self.services(namespace)
            .replace(&service.name_any(), &PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, StoreError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let endpoints = api.get(service).await?;

        let mut addresses = Vec::new();
        for subset in endpoints.subsets.unwrap_or_default() {
            // Each subset shares one port list; the first port is the serving one.
            let Some(port) = subset.ports.as_ref().and_then(|p| p.first()).map(|p| p.port) else {
                continue;
            };
            for address in subset.addresses.unwrap_or_default() {
                addresses.push(endpoint_address(&address.ip, port));
            }
        }
        Ok(addresses)
    }
}

/// `ip:port` for one endpoint address, bracketing IPv6 addresses.
fn endpoint_address(ip: &str, port: i32) -> String {
    match (ip.parse::<IpAddr>(), u16::try_from(port)) {
        (Ok(ip), Ok(port)) => SocketAddr::new(ip, port).to_string(),
        _ => format!("{ip}:{port}"),
    }
}
