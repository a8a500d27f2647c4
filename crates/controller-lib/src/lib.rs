//! Resource synchronization engine for mirroring Kubernetes objects
//!
//! This crate provides the core functionality for:
//! - Normalizing dynamic and typed objects into one document shape
//! - Idempotent upserts keyed by object UID
//! - Initial import with stale-record collection
//! - Auto-reconnecting watch loops, one per resource type
//! - Falco alert ingestion, health checks and observability

pub mod api;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod falco;
pub mod health;
pub mod mapper;
pub mod models;
pub mod observability;
pub mod source;
pub mod store;

pub use error::{StoreError, SyncError, SyncResult};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{StructuredLogger, SyncMetrics};
