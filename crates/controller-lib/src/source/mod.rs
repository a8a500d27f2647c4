//! Listing and watch capabilities for mirrored resource types

mod kubernetes;

pub use kubernetes::{custom_resource_sources, DynamicResourceSource, NamespaceSource};

use crate::error::SyncResult;
use crate::models::{ResourceType, SourceEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// Stream of watch notifications; ends when the server closes the watch
pub type EventStream = BoxStream<'static, SyncResult<SourceEvent>>;

/// Trait for the source of one resource type
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// The resource type this source lists and watches
    fn resource_type(&self) -> &ResourceType;

    /// List every current instance as a raw document
    async fn list(&self) -> SyncResult<Vec<Value>>;

    /// Open a fresh watch stream
    async fn watch(&self) -> SyncResult<EventStream>;
}
