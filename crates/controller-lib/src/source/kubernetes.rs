//! Kubernetes API sources
//!
//! Custom resources go through the dynamic `Api<DynamicObject>`; namespaces
//! through the typed `Api<Namespace>`. Both are converted to raw documents
//! at this boundary.

use super::{EventStream, ResourceSource};
use crate::error::{SyncError, SyncResult};
use crate::mapper;
use crate::models::{ResourceType, SourceEvent, WatchEventKind};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, WatchEvent, WatchParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resource version used to open watches ("any")
const WATCH_FROM: &str = "0";

/// Describe a cluster-wide custom resource by group, version and plural
pub fn api_resource(group: &str, version: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", group, version),
        kind: String::new(),
        plural: plural.to_string(),
    }
}

/// Build one dynamic source per configured plural
pub fn custom_resource_sources(
    client: &Client,
    group: &str,
    version: &str,
    plurals: &[String],
) -> Vec<Arc<dyn ResourceSource>> {
    plurals
        .iter()
        .map(|plural| {
            Arc::new(DynamicResourceSource::new(client.clone(), group, version, plural))
                as Arc<dyn ResourceSource>
        })
        .collect()
}

/// Source for one custom resource type
pub struct DynamicResourceSource {
    resource: ResourceType,
    api: Api<DynamicObject>,
}

impl DynamicResourceSource {
    pub fn new(client: Client, group: &str, version: &str, plural: &str) -> Self {
        let ar = api_resource(group, version, plural);
        Self {
            resource: ResourceType::custom(plural),
            api: Api::all_with(client, &ar),
        }
    }
}

#[async_trait]
impl ResourceSource for DynamicResourceSource {
    fn resource_type(&self) -> &ResourceType {
        &self.resource
    }

    async fn list(&self) -> SyncResult<Vec<Value>> {
        let objects = self.api.list(&ListParams::default()).await?;
        objects.items.iter().map(mapper::to_raw).collect()
    }

    async fn watch(&self) -> SyncResult<EventStream> {
        open_watch(&self.api, &self.resource).await
    }
}

/// Source for the namespace type, backed by the typed client
pub struct NamespaceSource {
    resource: ResourceType,
    api: Api<Namespace>,
}

impl NamespaceSource {
    pub fn new(client: Client) -> Self {
        Self {
            resource: ResourceType::namespaces(),
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ResourceSource for NamespaceSource {
    fn resource_type(&self) -> &ResourceType {
        &self.resource
    }

    async fn list(&self) -> SyncResult<Vec<Value>> {
        let namespaces = self.api.list(&ListParams::default()).await?;
        namespaces.items.iter().map(mapper::namespace_to_raw).collect()
    }

    async fn watch(&self) -> SyncResult<EventStream> {
        open_watch(&self.api, &self.resource).await
    }
}

async fn open_watch<K>(api: &Api<K>, resource: &ResourceType) -> SyncResult<EventStream>
where
    K: Clone + DeserializeOwned + Serialize + Debug + Send + 'static,
{
    let stream = api.watch(&WatchParams::default(), WATCH_FROM).await?;
    debug!(resource_type = %resource, "Opened watch stream");

    let resource = resource.clone();
    Ok(stream
        .map(move |item| {
            item.map_err(SyncError::from)
                .and_then(|event| convert_event(&resource, event))
        })
        .boxed())
}

/// Convert a typed watch event into a raw source event
fn convert_event<K: Serialize>(
    resource: &ResourceType,
    event: WatchEvent<K>,
) -> SyncResult<SourceEvent> {
    let event = match event {
        WatchEvent::Added(object) => SourceEvent::new(WatchEventKind::Added, mapper::to_raw(&object)?),
        WatchEvent::Modified(object) => {
            SourceEvent::new(WatchEventKind::Modified, mapper::to_raw(&object)?)
        }
        WatchEvent::Deleted(object) => {
            SourceEvent::new(WatchEventKind::Deleted, mapper::to_raw(&object)?)
        }
        WatchEvent::Bookmark(_) => SourceEvent::without_object(WatchEventKind::Bookmark),
        WatchEvent::Error(status) => {
            warn!(
                resource_type = %resource,
                code = status.code,
                reason = %status.reason,
                message = %status.message,
                "Watch reported an error status"
            );
            SourceEvent::without_object(WatchEventKind::Error)
        }
    };
    Ok(event)
}
