//! Falco alert consumer
//!
//! Follows the log stream of a Falco pod and stores every alert line as a
//! document. Runs independently of the resource sync tasks.

use crate::error::{SyncError, SyncResult};
use crate::health::{components, HealthRegistry};
use crate::observability::SyncMetrics;
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Words that mark a log line as a Falco alert
pub const PRIORITIES: &[&str] = &[
    "Emergency",
    "Alert",
    "Critical",
    "Error",
    "Warning",
    "Notice",
    "Informational",
    "Debug",
];

pub const ALERT_EVENT_TYPE: &str = "FALCO_ALERT";
pub const ALERT_RESOURCE_TYPE: &str = "falco_alert";

pub type LineStream = BoxStream<'static, SyncResult<String>>;

/// Access to pod logs
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Name of the first pod matching `label_selector`
    async fn find_pod(&self, namespace: &str, label_selector: &str) -> SyncResult<Option<String>>;

    /// Follow the log of one container
    async fn follow(&self, namespace: &str, pod: &str, container: &str) -> SyncResult<LineStream>;
}

/// Pod logs read through the Kubernetes API
pub struct KubePodLogs {
    client: Client,
}

impl KubePodLogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubePodLogs {
    async fn find_pod(&self, namespace: &str, label_selector: &str) -> SyncResult<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items.into_iter().find_map(|pod| pod.metadata.name))
    }

    async fn follow(&self, namespace: &str, pod: &str, container: &str) -> SyncResult<LineStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let reader = pods.log_stream(pod, &params).await?;
        Ok(reader.lines().map_err(SyncError::from).boxed())
    }
}

/// Retry behaviour of the consumer loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait when no Falco pod exists
    pub no_pods_delay: Duration,
    /// Base unit of the exponential backoff
    pub backoff_unit: Duration,
    /// Upper bound of one backoff sleep
    pub max_backoff: Duration,
    /// Consecutive failures before the consumer gives up
    pub max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            no_pods_delay: Duration::from_secs(30),
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_failures: 10,
        }
    }
}

impl RetryPolicy {
    /// Sleep after the `attempt`-th consecutive failure
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_unit
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

#[derive(Debug, Clone)]
pub struct FalcoConfig {
    pub namespace: String,
    pub label_selector: String,
    pub container: String,
    pub collection: String,
    pub retry: RetryPolicy,
}

impl Default for FalcoConfig {
    fn default() -> Self {
        Self {
            namespace: "falco-system".to_string(),
            label_selector: "app.kubernetes.io/name=falco".to_string(),
            container: "falco".to_string(),
            collection: "falco_alerts".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub fn is_alert_line(line: &str) -> bool {
    PRIORITIES.iter().any(|priority| line.contains(priority))
}

/// Parse a Falco log line.
///
/// JSON output is taken as is. Plain text is `<time>: <Priority> <message>`;
/// when the message holds a further `": "` the part before it is the rule
/// and the rest the output, otherwise the message is both.
pub fn parse_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Could not parse Falco log line");
                None
            }
        };
    }

    let mut parts = line.splitn(3, ": ");
    let (time, body) = (parts.next()?.trim(), parts.next()?.trim());
    let (priority, rest) = body.split_once(' ').unwrap_or((body, ""));
    let rest = rest.trim();

    let (rule, output) = match parts.next() {
        Some(output) => (if rest.is_empty() { "Unknown" } else { rest }, output.trim()),
        // Standard format: the whole message follows the priority
        None if !rest.is_empty() => (rest, rest),
        None => ("Unknown", ""),
    };

    Some(json!({
        "time": time,
        "priority": priority,
        "rule": rule,
        "output": output,
        "hostname": "unknown",
    }))
}

fn field<'a>(alert: &'a Value, key: &str) -> Option<&'a str> {
    alert.get(key).and_then(Value::as_str)
}

/// `<time>-<rule>-<digest of output>`
pub fn alert_id(alert: &Value) -> String {
    let digest = Sha256::digest(field(alert, "output").unwrap_or_default().as_bytes());
    format!(
        "{}-{}-{}",
        field(alert, "time").unwrap_or_default(),
        field(alert, "rule").unwrap_or_default(),
        &hex::encode(digest)[..16]
    )
}

/// Document stored for one alert
pub fn alert_document(alert: Value, cluster: &str, now: DateTime<Utc>) -> Value {
    let mut doc = Map::new();
    doc.insert("_event_type".into(), ALERT_EVENT_TYPE.into());
    doc.insert("_resource_type".into(), ALERT_RESOURCE_TYPE.into());
    doc.insert("_cluster".into(), cluster.into());
    doc.insert(
        "_timestamp".into(),
        now.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
    );
    doc.insert(
        "_priority".into(),
        field(&alert, "priority").unwrap_or("Unknown").into(),
    );
    doc.insert("_rule".into(), field(&alert, "rule").unwrap_or("Unknown").into());
    doc.insert("_output".into(), field(&alert, "output").unwrap_or_default().into());
    doc.insert("_alert_id".into(), alert_id(&alert).into());
    doc.insert("data".into(), alert);
    Value::Object(doc)
}

pub struct FalcoConsumer {
    logs: Arc<dyn LogSource>,
    store: Arc<dyn DocumentStore>,
    cluster: String,
    config: FalcoConfig,
    metrics: SyncMetrics,
    health: HealthRegistry,
}

impl FalcoConsumer {
    pub fn new(
        logs: Arc<dyn LogSource>,
        store: Arc<dyn DocumentStore>,
        cluster: impl Into<String>,
        config: FalcoConfig,
        metrics: SyncMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            logs,
            store,
            cluster: cluster.into(),
            config,
            metrics,
            health,
        }
    }

    /// Follow Falco logs until too many consecutive failures
    pub async fn run(&self) {
        let retry = &self.config.retry;
        info!(namespace = %self.config.namespace, "Starting to watch Falco logs");
        self.health.register(components::FALCO).await;

        let mut failures = 0u32;
        while failures < retry.max_failures {
            match self.follow_once().await {
                Ok(true) => failures = 0,
                Ok(false) => {
                    warn!(namespace = %self.config.namespace, "No Falco pods found");
                    self.health
                        .set_degraded(components::FALCO, "no falco pods found")
                        .await;
                    tokio::time::sleep(retry.no_pods_delay).await;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        max_attempts = retry.max_failures,
                        error = %e,
                        "Error watching Falco logs"
                    );
                    self.health
                        .set_degraded(components::FALCO, e.to_string())
                        .await;
                    if failures < retry.max_failures {
                        tokio::time::sleep(retry.backoff(failures)).await;
                    }
                }
            }
        }

        error!("Max retries reached for Falco log watching");
        self.health
            .set_unhealthy(components::FALCO, "gave up after repeated failures")
            .await;
    }

    /// Follow one pod until its log stream ends.
    ///
    /// Returns `Ok(false)` when no pod was found.
    async fn follow_once(&self) -> SyncResult<bool> {
        let Some(pod) = self
            .logs
            .find_pod(&self.config.namespace, &self.config.label_selector)
            .await?
        else {
            return Ok(false);
        };

        info!(pod = %pod, "Watching logs from Falco pod");
        let mut lines = self
            .logs
            .follow(&self.config.namespace, &pod, &self.config.container)
            .await?;
        self.health.set_healthy(components::FALCO).await;

        while let Some(line) = lines.next().await {
            self.handle_line(&line?).await;
        }
        debug!(pod = %pod, "Falco log stream ended");
        Ok(true)
    }

    /// Store `line` if it is an alert, returning whether a document was written
    pub async fn handle_line(&self, line: &str) -> bool {
        if !is_alert_line(line) {
            return false;
        }
        let Some(alert) = parse_line(line) else {
            debug!(line = %line, "Skipping unparseable Falco line");
            return false;
        };

        let doc = alert_document(alert, &self.cluster, Utc::now());
        let rule = doc["_rule"].as_str().unwrap_or_default().to_string();
        let priority = doc["_priority"].as_str().unwrap_or_default().to_string();

        match self.store.insert(&self.config.collection, doc).await {
            Ok(()) => {
                info!(rule = %rule, priority = %priority, "Stored Falco alert");
                self.metrics.inc_falco_alerts();
                true
            }
            Err(e) => {
                error!(rule = %rule, error = %e, "Failed to store Falco alert");
                false
            }
        }
    }
}
