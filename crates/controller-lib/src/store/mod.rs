//! Document store backends
//!
//! The engine only needs keyed upserts, a set-based stale delete and plain
//! inserts. MongoDB is the production backend; the in-memory store backs
//! dry runs and tests.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;

pub type StoreResult<T> = Result<T, StoreError>;

/// Field holding the synchronization key in every mirrored document
pub const IDENTIFIER_FIELD: &str = "_uid";
/// Field holding the source cluster name
pub const CLUSTER_FIELD: &str = "_cluster";

/// Selects the documents removed by a stale-record pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleFilter {
    /// Identifiers seen in the latest listing, kept
    pub live_ids: Vec<String>,
    /// Restrict deletion to documents written by this cluster
    pub cluster: Option<String>,
}

impl StaleFilter {
    pub fn new(live_ids: impl IntoIterator<Item = String>) -> Self {
        let mut live_ids: Vec<String> = live_ids.into_iter().collect();
        live_ids.sort();
        live_ids.dedup();
        Self {
            live_ids,
            cluster: None,
        }
    }

    pub fn scoped_to(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Whether a stored document is selected for deletion
    pub fn matches(&self, document: &Value) -> bool {
        let identifier = document.get(IDENTIFIER_FIELD).and_then(Value::as_str);
        let live = identifier
            .map(|id| self.live_ids.binary_search_by(|probe| probe.as_str().cmp(id)).is_ok())
            .unwrap_or(false);
        if live {
            return false;
        }

        match &self.cluster {
            Some(cluster) => {
                document.get(CLUSTER_FIELD).and_then(Value::as_str) == Some(cluster.as_str())
            }
            None => true,
        }
    }
}

/// Collection-level operations used by the engine
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the document keyed by `identifier`, inserting it if absent
    async fn upsert(&self, collection: &str, identifier: &str, document: Value) -> StoreResult<()>;

    /// Delete every document selected by `filter`, returning the count removed
    async fn delete_stale(&self, collection: &str, filter: &StaleFilter) -> StoreResult<u64>;

    /// Append a document without a key
    async fn insert(&self, collection: &str, document: Value) -> StoreResult<()>;
}
