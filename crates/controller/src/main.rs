//! Sync Controller - mirrors Kubernetes reports into a document store
//!
//! Imports every configured resource type and the cluster's namespaces,
//! then keeps the mirror current from per-type watch streams.

use anyhow::{Context, Result};
use controller_lib::{
    api::{self, AppState},
    cluster,
    engine::{ChangeWatcher, InitialImporter, Supervisor, SyncUpserter},
    falco::{FalcoConsumer, KubePodLogs},
    health::HealthRegistry,
    observability::{StructuredLogger, SyncMetrics},
    source::{custom_resource_sources, NamespaceSource, ResourceSource},
    store::{DocumentStore, MemoryStore, MongoStore},
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod config;
mod logging;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::ControllerConfig::load()?;
    let _log_guard = logging::init(&config)?;

    info!("Starting sync-controller");

    let kubeconfig = read_kubeconfig(&config);
    let client = kube_client(kubeconfig.clone()).await?;

    let store: Arc<dyn DocumentStore> = if config.dry_run {
        warn!("Dry run enabled, mirroring into process memory");
        Arc::new(MemoryStore::new())
    } else {
        let mongo = MongoStore::connect(&config.mongo_uri, &config.mongo_db)
            .await
            .context("Failed to connect to MongoDB")?;
        Arc::new(mongo)
    };

    let cluster_name =
        cluster::resolve_cluster_name(&client, kubeconfig.as_ref(), config.cluster.as_deref())
            .await;

    let health_registry = HealthRegistry::new();
    let metrics = SyncMetrics::new();

    let mut sources = custom_resource_sources(
        &client,
        &config.resource_group,
        &config.resource_version,
        &config.resources,
    );
    sources.push(Arc::new(NamespaceSource::new(client.clone())) as Arc<dyn ResourceSource>);

    let logger = StructuredLogger::new(&cluster_name);
    logger.log_startup(CONTROLLER_VERSION, sources.len());

    // Serve health and metrics while the initial imports run
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics.clone()));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let upserter = SyncUpserter::new(store.clone(), cluster_name.clone(), metrics.clone());
    let importer = InitialImporter::new(upserter.clone(), config.import_config(), metrics.clone());
    let watcher = ChangeWatcher::new(
        upserter,
        config.watch_config(),
        metrics.clone(),
        health_registry.clone(),
    );
    let supervisor = Supervisor::new(
        sources,
        importer,
        watcher,
        health_registry.clone(),
        config.supervisor_config(),
    );

    if config.falco.enabled {
        let consumer = FalcoConsumer::new(
            Arc::new(KubePodLogs::new(client.clone())),
            store.clone(),
            cluster_name.clone(),
            config.falco_config(),
            metrics.clone(),
            health_registry.clone(),
        );
        tokio::spawn(async move { consumer.run().await });
        info!("Started Falco alert consumer");
    }

    tokio::select! {
        _ = supervisor.run() => logger.log_watchers_exited(),
        reason = shutdown_signal() => logger.log_shutdown(reason),
    }

    Ok(())
}

/// Kubeconfig used for client construction and cluster name detection
fn read_kubeconfig(config: &config::ControllerConfig) -> Option<Kubeconfig> {
    let path = match config.kubeconfig_path() {
        Ok(path) => path,
        Err(e) => {
            debug!(error = %e, "No kubeconfig path");
            return None;
        }
    };

    match Kubeconfig::read_from(&path) {
        Ok(kubeconfig) => Some(kubeconfig),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not read kubeconfig");
            None
        }
    }
}

/// In-cluster configuration first, then the local kubeconfig
async fn kube_client(kubeconfig: Option<Kubeconfig>) -> Result<Client> {
    let client_config = match kube::Config::incluster() {
        Ok(client_config) => {
            info!("Loaded in-cluster kube config");
            client_config
        }
        Err(in_cluster) => {
            debug!(error = %in_cluster, "Not running in-cluster");
            let kubeconfig = kubeconfig.context("Failed to load kube config")?;
            let client_config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Failed to load kube config")?;
            info!("Loaded local kube config");
            client_config
        }
    };

    Client::try_from(client_config).context("Failed to create Kubernetes client")
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
