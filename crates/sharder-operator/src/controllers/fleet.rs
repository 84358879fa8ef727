//! Fleet convergence
//!
//! Drives one Deployment or one Service toward its declared shape, issuing at
//! most one write. Deployments are only reconciled on replica count;
//! Services only on selector. Everything else is left as found.

use crate::metrics;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use sharder_core::store::{ClusterObjectStore, StoreError};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub type Labels = BTreeMap<String, String>;

/// What a convergence step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetAction {
    Created,
    Updated,
    Unchanged,
}

/// Declared shape of a Deployment-like sub-fleet.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub namespace: String,
    pub name: String,
    pub replicas: i32,
    pub container: Container,
    pub labels: Labels,
    pub owner: Option<OwnerReference>,
}

/// Declared shape of a Service-like exposure object.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub namespace: String,
    pub name: String,
    pub port: i32,
    pub selector: Labels,
    pub owner: Option<OwnerReference>,
}

/// `{"app": name}`, the selector shared by a sub-fleet and its pods.
pub fn app_labels(name: &str) -> Labels {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

impl DeploymentTarget {
    /// The object created when the Deployment is absent.
    pub fn build(&self) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                owner_references: self.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![self.container.clone()],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl ServiceTarget {
    /// The object created when the Service is absent.
    pub fn build(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                owner_references: self.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.selector.clone()),
                ports: Some(vec![ServicePort {
                    port: self.port,
                    target_port: Some(IntOrString::Int(self.port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Replica count as the API server would default it.
fn replicas_of(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Absent → create; replica count differs → update replicas only; else nothing.
pub async fn reconcile_deployment(
    store: &dyn ClusterObjectStore,
    target: &DeploymentTarget,
) -> Result<FleetAction, StoreError> {
    let Some(current) = store.get_deployment(&target.namespace, &target.name).await? else {
        info!(
            namespace = %target.namespace,
            name = %target.name,
            replicas = target.replicas,
            "Creating deployment"
        );
        store
            .create_deployment(&target.namespace, &target.build())
            .await?;
        metrics::record_write("Deployment", "create");
        return Ok(FleetAction::Created);
    };

    let actual = replicas_of(&current);
    if actual == target.replicas {
        debug!(namespace = %target.namespace, name = %target.name, "Deployment matches");
        return Ok(FleetAction::Unchanged);
    }

    info!(
        namespace = %target.namespace,
        name = %target.name,
        from = actual,
        to = target.replicas,
        "Scaling deployment"
    );
    let mut updated = current;
    updated.spec.get_or_insert_with(Default::default).replicas = Some(target.replicas);
    store.update_deployment(&target.namespace, &updated).await?;
    metrics::record_write("Deployment", "update");
    Ok(FleetAction::Updated)
}

/// Absent → create; selector differs → update selector only; else nothing.
pub async fn reconcile_service(
    store: &dyn ClusterObjectStore,
    target: &ServiceTarget,
) -> Result<FleetAction, StoreError> {
    let Some(current) = store.get_service(&target.namespace, &target.name).await? else {
        info!(
            namespace = %target.namespace,
            name = %target.name,
            port = target.port,
            "Creating service"
        );
        store.create_service(&target.namespace, &target.build()).await?;
        metrics::record_write("Service", "create");
        return Ok(FleetAction::Created);
    };

    let selector = current.spec.as_ref().and_then(|s| s.selector.as_ref());
    if labels_equal(selector, &target.selector) {
        debug!(namespace = %target.namespace, name = %target.name, "Service matches");
        return Ok(FleetAction::Unchanged);
    }

    info!(
        namespace = %target.namespace,
        name = %target.name,
        selector = ?target.selector,
        "Updating service selector"
    );
    let mut updated = current;
    updated.spec.get_or_insert_with(Default::default).selector = Some(target.selector.clone());
    store.update_service(&target.namespace, &updated).await?;
    metrics::record_write("Service", "update");
    Ok(FleetAction::Updated)
}

/// Set equality over key/value pairs; a missing selector equals an empty one.
pub fn labels_equal(actual: Option<&Labels>, desired: &Labels) -> bool {
    match actual {
        Some(actual) => actual == desired,
        None => desired.is_empty(),
    }
}
