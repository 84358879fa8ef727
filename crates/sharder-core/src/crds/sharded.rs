//! Sharded CRD
//!
//! Defines the Sharded custom resource. Operators create and edit these;
//! the reconciler only ever reads them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sharded declares one sharded service: a fleet of shard servers routing
/// into a fleet of delegate servers, each exposed through its own Service.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "metaparticle.io",
    version = "v1",
    kind = "Sharded",
    namespaced,
    printcolumn = r#"{"name":"Service", "type":"string", "jsonPath":".spec.shardedServiceName"}"#,
    printcolumn = r#"{"name":"Shards", "type":"integer", "jsonPath":".spec.shardCount"}"#,
    printcolumn = r#"{"name":"Servers", "type":"integer", "jsonPath":".spec.shardServerCount"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShardedSpec {
    /// Name of the user-facing service, fronting the shard servers.
    pub sharded_service_name: String,

    /// Name of the delegate service the shard servers route into.
    pub delegate_service_name: String,

    /// Number of delegate replicas (shards).
    pub shard_count: i32,

    /// Number of shard server replicas.
    pub shard_server_count: i32,

    /// Image run by the delegate fleet.
    pub delegate_image: String,

    /// Port served by both fleets and both services.
    pub port: i32,

    /// Optional path capture pattern handed to the shard servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_shard_expression: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecValidationError {
    #[error("shardServerCount must be at least 1, got {0}")]
    ShardServerCount(i32),
    #[error("shardCount must not be negative, got {0}")]
    ShardCount(i32),
    #[error("port {0} is not a valid TCP port")]
    Port(i32),
    #[error("{0} must not be empty")]
    EmptyName(&'static str),
    #[error("shardedServiceName and delegateServiceName must differ, both are {0:?}")]
    SameServiceName(String),
    #[error("delegateImage must not be empty")]
    EmptyImage,
}

impl ShardedSpec {
    /// Check the invariants the reconciler relies on.
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.shard_server_count < 1 {
            return Err(SpecValidationError::ShardServerCount(self.shard_server_count));
        }
        if self.shard_count < 0 {
            return Err(SpecValidationError::ShardCount(self.shard_count));
        }
        if !(1..=i32::from(u16::MAX)).contains(&self.port) {
            return Err(SpecValidationError::Port(self.port));
        }
        if self.sharded_service_name.is_empty() {
            return Err(SpecValidationError::EmptyName("shardedServiceName"));
        }
        if self.delegate_service_name.is_empty() {
            return Err(SpecValidationError::EmptyName("delegateServiceName"));
        }
        if self.sharded_service_name == self.delegate_service_name {
            return Err(SpecValidationError::SameServiceName(
                self.sharded_service_name.clone(),
            ));
        }
        if self.delegate_image.is_empty() {
            return Err(SpecValidationError::EmptyImage);
        }
        Ok(())
    }
}
