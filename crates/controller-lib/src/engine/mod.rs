//! Resource synchronization engine
//!
//! This module provides:
//! - Sync upserter writing one document per call
//! - Initial importer with stale-record collection
//! - Change watcher with fixed-delay reconnects
//! - Supervisor running one import + watch pair per resource type

mod importer;
mod supervisor;
mod upserter;
mod watcher;

#[cfg(test)]
mod tests;

pub use importer::{ImportConfig, ImportSummary, InitialImporter};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use upserter::SyncUpserter;
pub use watcher::{ChangeWatcher, SessionOutcome, WatchConfig};
