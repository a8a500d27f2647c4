//! Core data models for the synchronization engine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Provenance of the last write to a mirrored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InitialImport,
    Added,
    Modified,
    Deleted,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InitialImport => "INITIAL_IMPORT",
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Error => "ERROR",
        }
    }

    /// Event type recorded for a watch notification.
    ///
    /// Bookmarks never carry an object and have no document counterpart.
    pub fn from_watch(kind: WatchEventKind) -> Option<Self> {
        match kind {
            WatchEventKind::Added => Some(EventType::Added),
            WatchEventKind::Modified => Some(EventType::Modified),
            WatchEventKind::Deleted => Some(EventType::Deleted),
            WatchEventKind::Error => Some(EventType::Error),
            WatchEventKind::Bookmark => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event type as reported by the source watch API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Error,
    Bookmark,
}

impl WatchEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventKind::Added => "ADDED",
            WatchEventKind::Modified => "MODIFIED",
            WatchEventKind::Deleted => "DELETED",
            WatchEventKind::Error => "ERROR",
            WatchEventKind::Bookmark => "BOOKMARK",
        }
    }
}

/// A single notification from a watch stream
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub kind: WatchEventKind,
    /// Object payload, `None` when the event does not carry a resource
    pub object: Option<Value>,
}

impl SourceEvent {
    pub fn new(kind: WatchEventKind, object: Value) -> Self {
        Self {
            kind,
            object: Some(object),
        }
    }

    pub fn without_object(kind: WatchEventKind) -> Self {
        Self { kind, object: None }
    }
}

/// A mirrored resource type and the collection it is written to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType {
    /// Logical type name stored in `_resource_type`
    pub name: String,
    /// Target collection
    pub collection: String,
}

impl ResourceType {
    /// Custom resources are stored in a collection named after their plural
    pub fn custom(plural: impl Into<String>) -> Self {
        let plural = plural.into();
        Self {
            name: plural.clone(),
            collection: plural,
        }
    }

    pub fn namespaces() -> Self {
        Self {
            name: "namespace".to_string(),
            collection: "namespaces".to_string(),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Output of the document mapper
#[derive(Debug, Clone, PartialEq)]
pub struct MappedObject {
    pub identifier: String,
    pub namespace: Option<String>,
    pub name: String,
    pub body: Value,
}

/// Document stored for every mirrored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(rename = "_uid")]
    pub identifier: String,
    #[serde(rename = "_event_type")]
    pub event_type: EventType,
    #[serde(rename = "_resource_type")]
    pub resource_type: String,
    #[serde(rename = "_namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "_name")]
    pub name: String,
    #[serde(rename = "_cluster")]
    pub cluster: String,
    #[serde(rename = "data")]
    pub body: Value,
}

impl ResourceDocument {
    pub fn new(
        resource: &ResourceType,
        cluster: &str,
        object: MappedObject,
        event_type: EventType,
    ) -> Self {
        Self {
            identifier: object.identifier,
            event_type,
            resource_type: resource.name.clone(),
            namespace: object.namespace,
            name: object.name,
            cluster: cluster.to_string(),
            body: object.body,
        }
    }
}

/// Trivy operator report plurals mirrored by default
pub const DEFAULT_RESOURCES: &[&str] = &[
    "vulnerabilityreports",
    "clustercompliancereports",
    "clusterconfigauditreports",
    "clusterinfraassessmentreports",
    "clusterrbacassessmentreports",
    "clustersbomreports",
    "clustervulnerabilityreports",
    "configauditreports",
    "exposedsecretreports",
    "infraassessmentreports",
    "rbacassessmentreports",
    "sbomreports",
];

pub const DEFAULT_RESOURCE_GROUP: &str = "aquasecurity.github.io";
pub const DEFAULT_RESOURCE_VERSION: &str = "v1alpha1";
