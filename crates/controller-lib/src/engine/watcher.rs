//! Change watcher
//!
//! Keeps one watch stream open per resource type and forwards every event to
//! the upserter. The loop is:
//! - Connecting: open a stream, sleeping a fixed delay after each failure
//! - Streaming: handle events strictly in arrival order
//! - back to Connecting as soon as the stream ends
//!
//! No resume cursor is kept between streams; the importer is the backstop
//! for anything missed while disconnected.

use super::upserter::SyncUpserter;
use crate::health::HealthRegistry;
use crate::mapper;
use crate::models::{EventType, ResourceType, SourceEvent};
use crate::observability::{RestartReason, SkipReason, SyncMetrics};
use crate::source::{EventStream, ResourceSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Configuration for watch loops
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Fixed delay before retrying a failed stream open
    pub reconnect_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Result of consuming one stream until it ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Events received from the stream
    pub processed: usize,
    /// Events that produced a successful store write
    pub written: usize,
    /// Transport error that ended the stream, if any
    pub stream_error: Option<String>,
}

#[derive(Clone)]
pub struct ChangeWatcher {
    upserter: SyncUpserter,
    config: WatchConfig,
    metrics: SyncMetrics,
    health: HealthRegistry,
}

impl ChangeWatcher {
    pub fn new(
        upserter: SyncUpserter,
        config: WatchConfig,
        metrics: SyncMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            upserter,
            config,
            metrics,
            health,
        }
    }

    /// Watch `source` forever
    pub async fn run(&self, source: Arc<dyn ResourceSource>) {
        let resource = source.resource_type().clone();
        info!(resource_type = %resource, "Starting watch loop");

        loop {
            let stream = match source.watch().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(resource_type = %resource, error = %e, "Error watching resource");
                    self.health.mark_reconnecting(&resource, &e.to_string()).await;
                    self.metrics
                        .inc_watch_restarts(&resource, RestartReason::OpenFailed);
                    tokio::time::sleep(self.config.reconnect_delay).await;
                    continue;
                }
            };
            self.health.mark_streaming(&resource).await;

            let outcome = self.consume(&resource, stream).await;
            match outcome.stream_error {
                Some(e) => {
                    warn!(
                        resource_type = %resource,
                        processed = outcome.processed,
                        error = %e,
                        "Watch stream failed, reopening"
                    );
                    self.metrics
                        .inc_watch_restarts(&resource, RestartReason::StreamError);
                }
                None => {
                    debug!(
                        resource_type = %resource,
                        processed = outcome.processed,
                        "Watch stream closed, reopening"
                    );
                    self.metrics.inc_watch_restarts(&resource, RestartReason::Closed);
                }
            }
        }
    }

    /// Drain one stream until it ends or yields a transport error
    pub async fn consume(&self, resource: &ResourceType, mut stream: EventStream) -> SessionOutcome {
        let mut outcome = SessionOutcome::default();

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    outcome.processed += 1;
                    if self.handle_event(resource, event).await {
                        outcome.written += 1;
                    }
                }
                Err(e) => {
                    outcome.stream_error = Some(e.to_string());
                    break;
                }
            }
        }

        outcome
    }

    /// Map and upsert a single event, returning whether a document was written
    pub async fn handle_event(&self, resource: &ResourceType, event: SourceEvent) -> bool {
        let kind = event.kind;
        let (Some(object), Some(event_type)) = (event.object, EventType::from_watch(kind)) else {
            debug!(resource_type = %resource, kind = kind.as_str(), "Skipping event without object");
            self.metrics.inc_skipped(resource, SkipReason::NoObject);
            return false;
        };

        match mapper::map_object(object) {
            Ok(mapped) => self.upserter.upsert(resource, mapped, event_type).await,
            Err(e) => {
                warn!(resource_type = %resource, event_type = %event_type, error = %e, "Skipping event");
                self.metrics
                    .inc_skipped(resource, SkipReason::MissingIdentifier);
                false
            }
        }
    }
}
