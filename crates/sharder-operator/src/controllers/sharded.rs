//! Sharded controller
//!
//! Polls every declared `Sharded` resource on a fixed interval and converges
//! the four objects each one owns:
//!
//! - `<name>-sharder` Deployment running the router, `shardServerCount` replicas
//! - `shardedServiceName` Service selecting the router pods
//! - `<name>-sharded` Deployment running the delegate image, `shardCount` replicas
//! - `delegateServiceName` Service selecting the delegate pods
//!
//! Resources are handled one after another within a tick, and ticks never
//! overlap, so two reconciles of the same resource never run at once. A
//! failing resource is logged and skipped; the rest of the tick proceeds.

use super::fleet::{
    app_labels, reconcile_deployment, reconcile_service, DeploymentTarget, FleetAction,
    ServiceTarget,
};
use super::Context;
use crate::metrics;
use k8s_openapi::api::core::v1::{Container, ContainerPort};
use kube::{Resource, ResourceExt};
use sharder_core::crds::{Sharded, SpecValidationError};
use sharder_core::store::StoreError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Binary the router container runs.
const SHARD_SERVER_COMMAND: &str = "sharder-server";
const SHARD_SERVER_CONTAINER: &str = "shard-server";
const DELEGATE_CONTAINER: &str = "delegate-server";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list Sharded resources: {0}")]
    SpecList(#[source] StoreError),
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecValidationError),
    #[error("{kind} {namespace}/{name}: {source}")]
    Store {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

/// Outcome of one pass over every declared resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reconciled: usize,
    pub failed: usize,
}

/// Router fleet name for a `Sharded` resource.
pub fn sharder_name(sharded: &Sharded) -> String {
    format!("{}-sharder", sharded.name_any())
}

/// Delegate fleet name for a `Sharded` resource.
pub fn delegate_name(sharded: &Sharded) -> String {
    format!("{}-sharded", sharded.name_any())
}

fn namespace_of(sharded: &Sharded) -> String {
    sharded.namespace().unwrap_or_else(|| "default".to_string())
}

fn container_port(port: i32) -> Option<Vec<ContainerPort>> {
    Some(vec![ContainerPort {
        container_port: port,
        ..Default::default()
    }])
}

/// The router container, pointed at the delegate service's endpoints.
fn shard_server_container(sharded: &Sharded, image: &str) -> Container {
    let spec = &sharded.spec;
    let mut command = vec![
        SHARD_SERVER_COMMAND.to_string(),
        format!("--address=0.0.0.0:{}", spec.port),
        format!(
            "--kubernetes-service={}/{}",
            namespace_of(sharded),
            spec.delegate_service_name
        ),
    ];
    if let Some(expr) = spec.path_shard_expression.as_deref().filter(|e| !e.is_empty()) {
        command.push(format!("--path-shard-expression={expr}"));
    }

    Container {
        name: SHARD_SERVER_CONTAINER.to_string(),
        image: Some(image.to_string()),
        command: Some(command),
        ports: container_port(spec.port),
        ..Default::default()
    }
}

fn delegate_container(sharded: &Sharded) -> Container {
    Container {
        name: DELEGATE_CONTAINER.to_string(),
        image: Some(sharded.spec.delegate_image.clone()),
        ports: container_port(sharded.spec.port),
        ..Default::default()
    }
}

/// Declared router Deployment and public Service.
pub fn sharder_targets(sharded: &Sharded, image: &str) -> (DeploymentTarget, ServiceTarget) {
    let namespace = namespace_of(sharded);
    let name = sharder_name(sharded);
    let labels = app_labels(&name);
    let owner = sharded.controller_owner_ref(&());

    let deployment = DeploymentTarget {
        namespace: namespace.clone(),
        name,
        replicas: sharded.spec.shard_server_count,
        container: shard_server_container(sharded, image),
        labels: labels.clone(),
        owner: owner.clone(),
    };
    let service = ServiceTarget {
        namespace,
        name: sharded.spec.sharded_service_name.clone(),
        port: sharded.spec.port,
        selector: labels,
        owner,
    };
    (deployment, service)
}

/// Declared delegate Deployment and the Service the routers discover.
pub fn delegate_targets(sharded: &Sharded) -> (DeploymentTarget, ServiceTarget) {
    let namespace = namespace_of(sharded);
    let name = delegate_name(sharded);
    let labels = app_labels(&name);
    let owner = sharded.controller_owner_ref(&());

    let deployment = DeploymentTarget {
        namespace: namespace.clone(),
        name,
        replicas: sharded.spec.shard_count,
        container: delegate_container(sharded),
        labels: labels.clone(),
        owner: owner.clone(),
    };
    let service = ServiceTarget {
        namespace,
        name: sharded.spec.delegate_service_name.clone(),
        port: sharded.spec.port,
        selector: labels,
        owner,
    };
    (deployment, service)
}

async fn converge_deployment(
    ctx: &Context,
    target: &DeploymentTarget,
) -> Result<FleetAction, ReconcileError> {
    reconcile_deployment(ctx.store.as_ref(), target)
        .await
        .map_err(|source| ReconcileError::Store {
            kind: "Deployment",
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            source,
        })
}

async fn converge_service(
    ctx: &Context,
    target: &ServiceTarget,
) -> Result<FleetAction, ReconcileError> {
    reconcile_service(ctx.store.as_ref(), target)
        .await
        .map_err(|source| ReconcileError::Store {
            kind: "Service",
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            source,
        })
}

/// Converge the four objects owned by one `Sharded` resource.
///
/// Stops at the first failing object; whatever was already converged stays.
#[instrument(skip_all, fields(namespace = %namespace_of(sharded), name = %sharded.name_any()))]
pub async fn reconcile(sharded: &Sharded, ctx: &Context) -> Result<(), ReconcileError> {
    sharded.spec.validate()?;

    let (sharder_deployment, sharded_service) = sharder_targets(sharded, &ctx.sharder_image);
    let (delegate_deployment, delegate_service) = delegate_targets(sharded);

    converge_deployment(ctx, &sharder_deployment).await?;
    converge_service(ctx, &sharded_service).await?;
    converge_deployment(ctx, &delegate_deployment).await?;
    converge_service(ctx, &delegate_service).await?;

    debug!("Reconciled Sharded");
    Ok(())
}

/// One pass over every declared resource.
///
/// A listing failure aborts the tick. Per-resource failures are logged and
/// counted without stopping the others.
pub async fn reconcile_all(ctx: &Context) -> Result<TickReport, ReconcileError> {
    let declared = ctx
        .store
        .list_sharded()
        .await
        .map_err(ReconcileError::SpecList)?;

    let mut report = TickReport::default();
    for sharded in &declared {
        match reconcile(sharded, ctx).await {
            Ok(()) => report.reconciled += 1,
            Err(e) => {
                error!(
                    namespace = %namespace_of(sharded),
                    name = %sharded.name_any(),
                    error = %e,
                    "Reconcile failed"
                );
                metrics::record_reconcile_error();
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

pub struct ShardedController;

impl ShardedController {
    /// Reconcile immediately, then every `interval` until `shutdown` flips.
    pub async fn run(ctx: Arc<Context>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "Starting Sharded controller");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("Sharded controller shutting down");
                    return;
                }
            }

            match reconcile_all(&ctx).await {
                Ok(report) => {
                    metrics::record_tick(true);
                    info!(
                        reconciled = report.reconciled,
                        failed = report.failed,
                        "Reconcile tick complete"
                    );
                }
                Err(e) => {
                    metrics::record_tick(false);
                    warn!(error = %e, "Skipping reconcile tick");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharder_core::crds::ShardedSpec;
    use sharder_core::store::{MemoryStore, Write, WriteOp};

    const IMAGE: &str = "sharder-server:test";

    fn sharded(name: &str, shard_count: i32, shard_server_count: i32) -> Sharded {
        let mut sharded = Sharded::new(
            name,
            ShardedSpec {
                sharded_service_name: name.to_string(),
                delegate_service_name: format!("{name}-delegate"),
                shard_count,
                shard_server_count,
                delegate_image: "nginx:1.27".to_string(),
                port: 8080,
                path_shard_expression: None,
            },
        );
        sharded.metadata.namespace = Some("default".to_string());
        sharded
    }

    fn context(store: &Arc<MemoryStore>) -> Context {
        Context::new(store.clone(), IMAGE)
    }

    fn replicas(store: &MemoryStore, name: &str) -> Option<i32> {
        store
            .deployment("default", name)
            .and_then(|d| d.spec)
            .and_then(|s| s.replicas)
    }

    fn write(kind: &'static str, op: WriteOp, name: &str) -> Write {
        Write {
            kind,
            op,
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    /// Seed all four objects exactly as the reconciler would create them.
    fn seed_converged(store: &MemoryStore, sharded: &Sharded) {
        let (deployment, service) = sharder_targets(sharded, IMAGE);
        store.seed_deployment("default", deployment.build());
        store.seed_service("default", service.build());
        let (deployment, service) = delegate_targets(sharded);
        store.seed_deployment("default", deployment.build());
        store.seed_service("default", service.build());
    }

    #[tokio::test]
    async fn test_first_tick_creates_fleets_and_second_is_idle() {
        let store = Arc::new(MemoryStore::new());
        store.add_sharded(sharded("web", 3, 2));
        let ctx = context(&store);

        let report = reconcile_all(&ctx).await.unwrap();
        assert_eq!(report, TickReport { reconciled: 1, failed: 0 });
        assert_eq!(
            store.take_writes(),
            vec![
                write("Deployment", WriteOp::Create, "web-sharder"),
                write("Service", WriteOp::Create, "web"),
                write("Deployment", WriteOp::Create, "web-sharded"),
                write("Service", WriteOp::Create, "web-delegate"),
            ]
        );
        assert_eq!(replicas(&store, "web-sharder"), Some(2));
        assert_eq!(replicas(&store, "web-sharded"), Some(3));

        reconcile_all(&ctx).await.unwrap();
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_router_container_points_at_delegate_service() {
        let store = Arc::new(MemoryStore::new());
        let mut web = sharded("web", 3, 2);
        web.spec.path_shard_expression = Some(".*(/users/[^/]*)/.*".to_string());
        store.add_sharded(web);
        reconcile_all(&context(&store)).await.unwrap();

        let pod = store
            .deployment("default", "web-sharder")
            .and_then(|d| d.spec)
            .and_then(|s| s.template.spec)
            .unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.name, "shard-server");
        assert_eq!(container.image.as_deref(), Some(IMAGE));
        let command = container.command.clone().unwrap();
        assert!(command.contains(&"--kubernetes-service=default/web-delegate".to_string()));
        assert!(command.contains(&"--address=0.0.0.0:8080".to_string()));
        assert!(command.contains(&"--path-shard-expression=.*(/users/[^/]*)/.*".to_string()));

        let delegate = store
            .deployment("default", "web-sharded")
            .and_then(|d| d.spec)
            .and_then(|s| s.template.spec)
            .unwrap();
        assert_eq!(delegate.containers[0].name, "delegate-server");
        assert_eq!(delegate.containers[0].image.as_deref(), Some("nginx:1.27"));

        let service = store.service("default", "web").and_then(|s| s.spec).unwrap();
        assert_eq!(service.selector, Some(app_labels("web-sharder")));
        let service = store.service("default", "web-delegate").and_then(|s| s.spec).unwrap();
        assert_eq!(service.selector, Some(app_labels("web-sharded")));
    }

    #[tokio::test]
    async fn test_replica_drift_yields_single_update() {
        let store = Arc::new(MemoryStore::new());
        // Everything matches except the router fleet's replica count.
        seed_converged(&store, &sharded("web", 3, 5));
        store.add_sharded(sharded("web", 3, 2));

        reconcile_all(&context(&store)).await.unwrap();
        assert_eq!(
            store.writes(),
            vec![write("Deployment", WriteOp::Update, "web-sharder")]
        );
        assert_eq!(replicas(&store, "web-sharder"), Some(2));
    }

    #[tokio::test]
    async fn test_converged_objects_see_no_writes() {
        let store = Arc::new(MemoryStore::new());
        let web = sharded("web", 3, 2);
        seed_converged(&store, &web);
        store.add_sharded(web);

        let report = reconcile_all(&context(&store)).await.unwrap();
        assert_eq!(report.reconciled, 1);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_failing_resource_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        store.add_sharded(sharded("bad", 1, 1));
        store.add_sharded(sharded("good", 1, 1));
        store.fail_object("bad-sharder");

        let report = reconcile_all(&context(&store)).await.unwrap();
        assert_eq!(report, TickReport { reconciled: 1, failed: 1 });
        assert!(store.deployment("default", "good-sharder").is_some());
        assert!(store.deployment("default", "good-sharded").is_some());
        assert!(store.deployment("default", "bad-sharded").is_none());

        store.heal_object("bad-sharder");
        let report = reconcile_all(&context(&store)).await.unwrap();
        assert_eq!(report, TickReport { reconciled: 2, failed: 0 });
        assert!(store.deployment("default", "bad-sharded").is_some());
    }

    #[tokio::test]
    async fn test_invalid_spec_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.add_sharded(sharded("broken", 1, 0));

        let err = reconcile(&sharded("broken", 1, 0), &context(&store))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::InvalidSpec(SpecValidationError::ShardServerCount(0))
        ));

        let report = reconcile_all(&context(&store)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_skips_tick() {
        let store = Arc::new(MemoryStore::new());
        store.add_sharded(sharded("web", 1, 1));
        store.fail_listing(true);

        let err = reconcile_all(&context(&store)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::SpecList(_)));
        assert!(store.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_reconciles_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.add_sharded(sharded("web", 1, 1));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(ShardedController::run(
            Arc::new(context(&store)),
            Duration::from_secs(30),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.take_writes().len(), 4);

        // Out-of-band scale is reverted on the next tick.
        let mut scaled = store.deployment("default", "web-sharded").unwrap();
        scaled.spec.as_mut().unwrap().replicas = Some(7);
        store.seed_deployment("default", scaled);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(replicas(&store, "web-sharded"), Some(1));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
