//! In-memory document store

use super::{DocumentStore, StaleFilter, StoreResult, IDENTIFIER_FIELD};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Document store kept entirely in process memory
///
/// Collections can be marked as failing to simulate an unavailable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// collection -> key -> document
    collections: DashMap<String, HashMap<String, Value>>,
    failing: DashSet<String>,
    writes: AtomicU64,
    next_insert_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail until restored
    pub fn fail_collection(&self, collection: &str) {
        self.failing.insert(collection.to_string());
    }

    pub fn restore_collection(&self, collection: &str) {
        self.failing.remove(collection);
    }

    /// Get a document by key
    pub fn get(&self, collection: &str, identifier: &str) -> Option<Value> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(identifier).cloned())
    }

    /// List all documents in a collection
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted keys of a collection
    pub fn identifiers(&self, collection: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Total number of successful upserts and inserts
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self, collection: &str) -> StoreResult<()> {
        if self.failing.contains(collection) {
            return Err(StoreError::unavailable(format!(
                "collection {} is failing",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, identifier: &str, document: Value) -> StoreResult<()> {
        self.check_available(collection)?;
        if !document.is_object() {
            return Err(StoreError::NotAnObject);
        }

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(identifier.to_string(), document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_stale(&self, collection: &str, filter: &StaleFilter) -> StoreResult<u64> {
        self.check_available(collection)?;

        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        let removed = (before - docs.len()) as u64;

        debug!(collection = %collection, removed = removed, "Removed stale documents");
        Ok(removed)
    }

    async fn insert(&self, collection: &str, document: Value) -> StoreResult<()> {
        self.check_available(collection)?;
        if !document.is_object() {
            return Err(StoreError::NotAnObject);
        }

        let key = document
            .get(IDENTIFIER_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", self.next_insert_id.fetch_add(1, Ordering::SeqCst)));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key, document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
