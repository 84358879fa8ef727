//! Sharder Operator
//!
//! Reconciles `Sharded` resources into router and delegate fleets.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use sharder_core::shutdown::shutdown_signal;
use sharder_core::telemetry::{init_tracing, LogFormat};
use sharder_core::{KubeStore, Sharded};
use sharder_operator::{
    admin,
    controllers::{Context, ShardedController},
    metrics::init_metrics,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sharder-operator")]
#[command(about = "Kubernetes operator for sharded services")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CRD manifest to stdout
    Crds,
    /// Run the operator
    Run {
        /// Seconds between reconcile ticks
        #[arg(long, env = "SHARDER_POLL_INTERVAL_SECS", default_value_t = 30)]
        poll_interval_secs: u64,

        /// Only reconcile resources in this namespace (all namespaces if unset)
        #[arg(long, env = "SHARDER_NAMESPACE")]
        namespace: Option<String>,

        /// Image run by every router fleet
        #[arg(long, env = "SHARDER_IMAGE", default_value = "sharder-server:latest")]
        sharder_image: String,

        /// Listen address for /health and /metrics
        #[arg(long, env = "SHARDER_METRICS_ADDRESS", default_value = "0.0.0.0:9091")]
        metrics_address: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            println!("---");
            println!("{}", serde_yaml::to_string(&Sharded::crd())?);
            Ok(())
        }
        Commands::Run {
            poll_interval_secs,
            namespace,
            sharder_image,
            metrics_address,
        } => {
            run_operator(
                Duration::from_secs(poll_interval_secs.max(1)),
                namespace,
                sharder_image,
                metrics_address,
            )
            .await
        }
    }
}

async fn run_operator(
    interval: Duration,
    namespace: Option<String>,
    sharder_image: String,
    metrics_address: SocketAddr,
) -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env());

    info!(image = %sharder_image, namespace = ?namespace, "Starting sharder-operator");

    let mut store = KubeStore::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    if let Some(ns) = namespace {
        store = store.with_namespace(ns);
    }
    store
        .check_connection()
        .await
        .context("Failed to reach Kubernetes API server")?;
    info!("Connected to Kubernetes");

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to initialize metrics");
            None
        }
    };

    let ctx = Arc::new(Context::new(Arc::new(store), sharder_image));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let listener = TcpListener::bind(metrics_address)
        .await
        .with_context(|| format!("Failed to bind {metrics_address}"))?;
    let mut admin_shutdown = shutdown_rx.clone();
    let admin_server = axum::serve(listener, admin::create_router(metrics))
        .with_graceful_shutdown(async move {
            let _ = admin_shutdown.wait_for(|stop| *stop).await;
        });

    let (served, ()) = tokio::join!(
        async { admin_server.await },
        ShardedController::run(ctx, interval, shutdown_rx)
    );
    served.context("Admin server failed")?;

    info!("sharder-operator stopped");
    Ok(())
}
