//! Idempotent document writes

use crate::models::{EventType, MappedObject, ResourceDocument, ResourceType};
use crate::observability::SyncMetrics;
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing::{error, info};

/// Writes normalized documents into the collection of their resource type
#[derive(Clone)]
pub struct SyncUpserter {
    store: Arc<dyn DocumentStore>,
    cluster: String,
    metrics: SyncMetrics,
}

impl SyncUpserter {
    pub fn new(store: Arc<dyn DocumentStore>, cluster: impl Into<String>, metrics: SyncMetrics) -> Self {
        Self {
            store,
            cluster: cluster.into(),
            metrics,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Replace the document keyed by the object's UID.
    ///
    /// Store failures are logged and reported as `false`; they are never retried.
    pub async fn upsert(
        &self,
        resource: &ResourceType,
        object: MappedObject,
        event_type: EventType,
    ) -> bool {
        let identifier = object.identifier.clone();
        let document = ResourceDocument::new(resource, &self.cluster, object, event_type);
        let name = document.name.clone();

        let value = match serde_json::to_value(&document) {
            Ok(value) => value,
            Err(e) => {
                error!(resource_type = %resource, name = %name, error = %e, "Failed to serialize document");
                self.metrics.inc_upsert_failures(resource);
                return false;
            }
        };

        match self
            .store
            .upsert(&resource.collection, &identifier, value)
            .await
        {
            Ok(()) => {
                info!(
                    resource_type = %resource,
                    name = %name,
                    event_type = %event_type,
                    "Synced resource"
                );
                self.metrics.inc_upserted(resource, event_type);
                true
            }
            Err(e) => {
                error!(
                    resource_type = %resource,
                    name = %name,
                    uid = %identifier,
                    error = %e,
                    "Failed to sync resource"
                );
                self.metrics.inc_upsert_failures(resource);
                false
            }
        }
    }
}
