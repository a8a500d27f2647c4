//! Initial import with stale-record collection

use super::upserter::SyncUpserter;
use crate::error::{SyncError, SyncResult};
use crate::mapper;
use crate::models::EventType;
use crate::observability::{SkipReason, SyncMetrics};
use crate::source::ResourceSource;
use crate::store::StaleFilter;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Configuration for import passes
#[derive(Debug, Clone, Default)]
pub struct ImportConfig {
    /// Only delete stale documents written by this cluster
    pub scope_stale_delete_to_cluster: bool,
}

/// Outcome of one import pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub listed: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `None` when the stale delete itself failed
    pub stale_removed: Option<u64>,
}

/// Lists a resource type, upserts every instance, then removes stale documents
#[derive(Clone)]
pub struct InitialImporter {
    upserter: SyncUpserter,
    config: ImportConfig,
    metrics: SyncMetrics,
}

impl InitialImporter {
    pub fn new(upserter: SyncUpserter, config: ImportConfig, metrics: SyncMetrics) -> Self {
        Self {
            upserter,
            config,
            metrics,
        }
    }

    /// Run one full import pass.
    ///
    /// A listing error aborts the pass before anything is written. Write and
    /// stale-delete failures are logged and reflected in the summary only.
    pub async fn import_all(&self, source: &dyn ResourceSource) -> SyncResult<ImportSummary> {
        let resource = source.resource_type();
        let start = Instant::now();

        let objects = match source.list().await {
            Ok(objects) => objects,
            Err(e) => {
                error!(resource_type = %resource, error = %e, "Error during initial import");
                self.metrics.inc_import_failures(resource);
                return Err(e);
            }
        };
        info!(resource_type = %resource, count = objects.len(), "Initial import");

        let mut summary = ImportSummary {
            listed: objects.len(),
            ..Default::default()
        };
        let mut live_ids = HashSet::with_capacity(objects.len());

        for raw in objects {
            let mapped = match mapper::map_object(raw) {
                Ok(mapped) => mapped,
                Err(SyncError::MissingIdentifier { name }) => {
                    warn!(resource_type = %resource, name = ?name, "No UID for resource, skipping");
                    self.metrics.inc_skipped(resource, SkipReason::MissingIdentifier);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            live_ids.insert(mapped.identifier.clone());
            if self
                .upserter
                .upsert(resource, mapped, EventType::InitialImport)
                .await
            {
                summary.upserted += 1;
            } else {
                summary.failed += 1;
            }
        }

        let mut filter = StaleFilter::new(live_ids);
        if self.config.scope_stale_delete_to_cluster {
            filter = filter.scoped_to(self.upserter.cluster());
        }

        summary.stale_removed = match self
            .upserter
            .store()
            .delete_stale(&resource.collection, &filter)
            .await
        {
            Ok(removed) => {
                info!(resource_type = %resource, removed = removed, "Removed stale records");
                self.metrics.add_stale_deleted(resource, removed);
                Some(removed)
            }
            Err(e) => {
                error!(resource_type = %resource, error = %e, "Failed to remove stale records");
                self.metrics.inc_stale_delete_failures(resource);
                None
            }
        };

        self.metrics
            .observe_import_duration(resource, start.elapsed().as_secs_f64());
        Ok(summary)
    }
}
