//! Observability infrastructure for the sync controller
//!
//! Provides:
//! - Prometheus metrics (writes, failures, stale deletes, watch restarts, import latency)
//! - Structured lifecycle logging with tracing

use crate::models::{EventType, ResourceType};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for import passes (in seconds)
const IMPORT_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    documents_upserted: IntCounterVec,
    upsert_failures: IntCounterVec,
    stale_documents_deleted: IntCounterVec,
    stale_delete_failures: IntCounterVec,
    events_skipped: IntCounterVec,
    watch_restarts: IntCounterVec,
    import_failures: IntCounterVec,
    import_duration_seconds: HistogramVec,
    falco_alerts_stored: IntCounter,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            documents_upserted: register_int_counter_vec!(
                "sync_controller_documents_upserted_total",
                "Documents written to the store",
                &["resource_type", "event_type"]
            )
            .expect("Failed to register documents_upserted_total"),

            upsert_failures: register_int_counter_vec!(
                "sync_controller_upsert_failures_total",
                "Store writes that failed",
                &["resource_type"]
            )
            .expect("Failed to register upsert_failures_total"),

            stale_documents_deleted: register_int_counter_vec!(
                "sync_controller_stale_documents_deleted_total",
                "Documents removed by stale-record collection",
                &["resource_type"]
            )
            .expect("Failed to register stale_documents_deleted_total"),

            stale_delete_failures: register_int_counter_vec!(
                "sync_controller_stale_delete_failures_total",
                "Stale-record deletes that failed",
                &["resource_type"]
            )
            .expect("Failed to register stale_delete_failures_total"),

            events_skipped: register_int_counter_vec!(
                "sync_controller_events_skipped_total",
                "Objects or events skipped without a write",
                &["resource_type", "reason"]
            )
            .expect("Failed to register events_skipped_total"),

            watch_restarts: register_int_counter_vec!(
                "sync_controller_watch_restarts_total",
                "Watch streams reopened",
                &["resource_type", "reason"]
            )
            .expect("Failed to register watch_restarts_total"),

            import_failures: register_int_counter_vec!(
                "sync_controller_import_failures_total",
                "Import passes aborted by a listing error",
                &["resource_type"]
            )
            .expect("Failed to register import_failures_total"),

            import_duration_seconds: register_histogram_vec!(
                "sync_controller_import_duration_seconds",
                "Time spent on one initial import pass",
                &["resource_type"],
                IMPORT_BUCKETS.to_vec()
            )
            .expect("Failed to register import_duration_seconds"),

            falco_alerts_stored: register_int_counter!(
                "sync_controller_falco_alerts_stored_total",
                "Falco alerts written to the store"
            )
            .expect("Failed to register falco_alerts_stored_total"),
        }
    }
}

/// Why an object or event produced no write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingIdentifier,
    NoObject,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingIdentifier => "missing_identifier",
            SkipReason::NoObject => "no_object",
        }
    }
}

/// Why a watch stream was reopened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Closed,
    StreamError,
    OpenFailed,
}

impl RestartReason {
    fn as_str(&self) -> &'static str {
        match self {
            RestartReason::Closed => "closed",
            RestartReason::StreamError => "stream_error",
            RestartReason::OpenFailed => "open_failed",
        }
    }
}

/// Handle to the global sync metrics; clones share the same metrics
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new)
    }

    pub fn inc_upserted(&self, resource: &ResourceType, event_type: EventType) {
        self.inner()
            .documents_upserted
            .with_label_values(&[&resource.name, event_type.as_str()])
            .inc();
    }

    pub fn inc_upsert_failures(&self, resource: &ResourceType) {
        self.inner()
            .upsert_failures
            .with_label_values(&[&resource.name])
            .inc();
    }

    pub fn add_stale_deleted(&self, resource: &ResourceType, count: u64) {
        self.inner()
            .stale_documents_deleted
            .with_label_values(&[&resource.name])
            .inc_by(count);
    }

    pub fn inc_stale_delete_failures(&self, resource: &ResourceType) {
        self.inner()
            .stale_delete_failures
            .with_label_values(&[&resource.name])
            .inc();
    }

    pub fn inc_skipped(&self, resource: &ResourceType, reason: SkipReason) {
        self.inner()
            .events_skipped
            .with_label_values(&[&resource.name, reason.as_str()])
            .inc();
    }

    pub fn inc_watch_restarts(&self, resource: &ResourceType, reason: RestartReason) {
        self.inner()
            .watch_restarts
            .with_label_values(&[&resource.name, reason.as_str()])
            .inc();
    }

    pub fn inc_import_failures(&self, resource: &ResourceType) {
        self.inner()
            .import_failures
            .with_label_values(&[&resource.name])
            .inc();
    }

    pub fn observe_import_duration(&self, resource: &ResourceType, duration_secs: f64) {
        self.inner()
            .import_duration_seconds
            .with_label_values(&[&resource.name])
            .observe(duration_secs);
    }

    pub fn inc_falco_alerts(&self) {
        self.inner().falco_alerts_stored.inc();
    }

    pub fn upserted(&self, resource: &ResourceType, event_type: EventType) -> u64 {
        self.inner()
            .documents_upserted
            .with_label_values(&[&resource.name, event_type.as_str()])
            .get()
    }
}

/// Structured logger for controller lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, resource_types: usize) {
        info!(
            event = "controller_started",
            cluster = %self.cluster,
            controller_version = %version,
            resource_types = resource_types,
            "Sync controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Sync controller shutting down"
        );
    }

    pub fn log_watchers_exited(&self) {
        warn!(
            event = "watchers_exited",
            cluster = %self.cluster,
            "All sync tasks exited"
        );
    }
}
