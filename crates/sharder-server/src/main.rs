//! Sharder Server - consistent-hashing request router

use anyhow::Context;
use clap::Parser;
use sharder_core::shutdown::shutdown_signal;
use sharder_core::store::{ClusterObjectStore, KubeStore};
use sharder_core::telemetry::{init_tracing, LogFormat};
use sharder_server::{
    api::{self, AppState},
    config::{Config, SourceSpec},
    discovery::{self, run_refresh_loop},
    metrics::init_metrics,
    router::{self, Director, ProxyState},
    sharding::Membership,
    version,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = Config::parse();
    init_tracing(LogFormat::from_env());

    info!(version = %version::full_version(), "Starting sharder-server");

    let extractor = config.key_extractor()?;
    let scheme = config.scheme()?;
    let spec = config.source_spec()?;

    let store: Option<Arc<dyn ClusterObjectStore>> = match &spec {
        SourceSpec::Service { .. } => {
            let store = KubeStore::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            store
                .check_connection()
                .await
                .context("Failed to reach Kubernetes API server")?;
            info!("Connected to Kubernetes");
            Some(Arc::new(store))
        }
        SourceSpec::Static(_) => None,
    };
    let source = spec.into_source(store)?;

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to initialize metrics");
            None
        }
    };

    let membership = Arc::new(Membership::new(config.replicas));
    let initial = discovery::initial_members(&source, config.startup_timeout())
        .await
        .context("Initial backend discovery failed")?;
    info!(source = %source, members = ?initial, "Sharder starting, spreading load");
    membership.set_members(initial).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh = source.is_dynamic().then(|| {
        tokio::spawn(run_refresh_loop(
            source,
            membership.clone(),
            config.discovery_interval(),
            shutdown_rx.clone(),
        ))
    });

    let director = Arc::new(Director::new(extractor, membership.clone(), scheme));
    let proxy_state = ProxyState::new(director).context("Failed to build HTTP client")?;
    let proxy_app = router::create_router(proxy_state);
    let admin_app = api::create_router(AppState::new(membership, metrics_state));

    let proxy_listener = TcpListener::bind(config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    let admin_listener = TcpListener::bind(config.admin_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.admin_address))?;

    info!(
        address = %config.address,
        admin_address = %config.admin_address,
        "Serving"
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let proxy_server = axum::serve(
        proxy_listener,
        proxy_app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    tokio::try_join!(
        async { proxy_server.await.context("Proxy server failed") },
        async { admin_server.await.context("Admin server failed") },
    )?;

    if let Some(handle) = refresh {
        let _ = handle.await;
    }

    info!("sharder-server stopped");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
