//! Synchronization supervisor
//!
//! Runs the initial import of each resource type before launching its
//! watcher, so the stale delete never races writes from that type's own
//! watch stream.

use super::importer::InitialImporter;
use super::watcher::ChangeWatcher;
use crate::health::{components, HealthRegistry};
use crate::models::ResourceType;
use crate::source::ResourceSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    /// Re-run the importer of every type at this interval
    pub resync_interval: Option<Duration>,
}

pub struct Supervisor {
    sources: Vec<Arc<dyn ResourceSource>>,
    importer: InitialImporter,
    watcher: ChangeWatcher,
    health: HealthRegistry,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        sources: Vec<Arc<dyn ResourceSource>>,
        importer: InitialImporter,
        watcher: ChangeWatcher,
        health: HealthRegistry,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            sources,
            importer,
            watcher,
            health,
            config,
        }
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.sources
            .iter()
            .map(|source| source.resource_type().clone())
            .collect()
    }

    /// Import each resource type, then spawn its watcher.
    ///
    /// Returns the set of spawned tasks; none of them returns under normal
    /// operation.
    pub async fn start(&self) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        for source in &self.sources {
            let resource = source.resource_type().clone();
            self.health.register(&components::resource(&resource)).await;

            run_import(&self.importer, &self.health, source.as_ref()).await;

            let watcher = self.watcher.clone();
            let watched = Arc::clone(source);
            tasks.spawn(async move { watcher.run(watched).await });

            if let Some(interval) = self.config.resync_interval {
                let importer = self.importer.clone();
                let health = self.health.clone();
                let resynced = Arc::clone(source);
                tasks.spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    // The first tick completes immediately and the import just ran
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        run_import(&importer, &health, resynced.as_ref()).await;
                    }
                });
            }
        }

        self.health.set_ready(true).await;
        info!(
            resource_types = self.sources.len(),
            "Controller started. Watching resources and namespaces..."
        );
        tasks
    }

    /// Start every task and wait for all of them to exit
    pub async fn run(&self) {
        let mut tasks = self.start().await;

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => warn!("Sync task exited"),
                Err(e) if e.is_panic() => error!(error = %e, "Sync task panicked"),
                Err(e) => warn!(error = %e, "Sync task cancelled"),
            }
        }
    }
}

async fn run_import(importer: &InitialImporter, health: &HealthRegistry, source: &dyn ResourceSource) {
    let resource = source.resource_type();
    match importer.import_all(source).await {
        Ok(summary) => {
            info!(
                resource_type = %resource,
                listed = summary.listed,
                upserted = summary.upserted,
                skipped = summary.skipped,
                failed = summary.failed,
                stale_removed = ?summary.stale_removed,
                "Import pass complete"
            );
            health.mark_imported(resource).await;
        }
        Err(e) => {
            // The watcher still starts; it may succeed on its own
            health.mark_import_failed(resource, &e.to_string()).await;
        }
    }
}
