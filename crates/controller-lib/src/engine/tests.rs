//! Integration tests for the sync engine
//!
//! These tests verify:
//! - Upsert idempotence and stale-record collection
//! - Watch reconnection and event handling
//! - Isolation between resource types
//! - The namespace import + modify scenario end to end

use super::*;
use crate::error::{SyncError, SyncResult};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::mapper;
use crate::models::{EventType, ResourceType, SourceEvent, WatchEventKind};
use crate::observability::SyncMetrics;
use crate::source::{EventStream, ResourceSource};
use crate::store::{DocumentStore, MemoryStore};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CLUSTER: &str = "test-cluster";

/// One scripted answer to `watch()`
enum Session {
    Events(Vec<SyncResult<SourceEvent>>),
    OpenFails,
}

/// Source replaying scripted listings and watch sessions
///
/// Once the scripted sessions are used up, `watch()` returns a stream that
/// never yields.
struct ScriptedSource {
    resource: ResourceType,
    listing: Mutex<Option<Vec<Value>>>,
    sessions: Mutex<VecDeque<Session>>,
    watch_calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            listing: Mutex::new(Some(Vec::new())),
            sessions: Mutex::new(VecDeque::new()),
            watch_calls: AtomicUsize::new(0),
        }
    }

    fn with_listing(self, objects: Vec<Value>) -> Self {
        *self.listing.lock().unwrap() = Some(objects);
        self
    }

    fn with_failing_listing(self) -> Self {
        *self.listing.lock().unwrap() = None;
        self
    }

    fn with_session(self, events: Vec<SourceEvent>) -> Self {
        self.sessions
            .lock()
            .unwrap()
            .push_back(Session::Events(events.into_iter().map(Ok).collect()));
        self
    }

    fn with_raw_session(self, items: Vec<SyncResult<SourceEvent>>) -> Self {
        self.sessions.lock().unwrap().push_back(Session::Events(items));
        self
    }

    fn with_open_failure(self) -> Self {
        self.sessions.lock().unwrap().push_back(Session::OpenFails);
        self
    }

    fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceSource for ScriptedSource {
    fn resource_type(&self) -> &ResourceType {
        &self.resource
    }

    async fn list(&self) -> SyncResult<Vec<Value>> {
        self.listing
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::upstream("listing failed"))
    }

    async fn watch(&self) -> SyncResult<EventStream> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().unwrap().pop_front();
        match session {
            Some(Session::Events(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(Session::OpenFails) => Err(SyncError::upstream("connection refused")),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

fn object(uid: &str, name: &str) -> Value {
    json!({"metadata": {"uid": uid, "name": name, "namespace": "default"}})
}

fn namespace(uid: &str, name: &str) -> Value {
    json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"uid": uid, "name": name}})
}

struct Harness {
    store: Arc<MemoryStore>,
    health: HealthRegistry,
    upserter: SyncUpserter,
    importer: InitialImporter,
    watcher: ChangeWatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with_import_config(ImportConfig::default())
    }

    fn with_import_config(config: ImportConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let metrics = SyncMetrics::new();
        let health = HealthRegistry::new();
        let upserter = SyncUpserter::new(store.clone(), CLUSTER, metrics.clone());
        let importer = InitialImporter::new(upserter.clone(), config, metrics.clone());
        let watcher = ChangeWatcher::new(
            upserter.clone(),
            WatchConfig {
                reconnect_delay: Duration::from_millis(10),
            },
            metrics,
            health.clone(),
        );

        Self {
            store,
            health,
            upserter,
            importer,
            watcher,
        }
    }

    fn supervisor(&self, sources: Vec<Arc<dyn ResourceSource>>) -> Supervisor {
        Supervisor::new(
            sources,
            self.importer.clone(),
            self.watcher.clone(),
            self.health.clone(),
            SupervisorConfig::default(),
        )
    }
}

/// Poll `condition` until it holds or two seconds pass
async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

mod upserter_tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        let mapped = mapper::map_object(object("a", "first")).unwrap();

        assert!(
            harness
                .upserter
                .upsert(&resource, mapped.clone(), EventType::Added)
                .await
        );
        assert!(
            harness
                .upserter
                .upsert(&resource, mapped, EventType::Modified)
                .await
        );

        assert_eq!(harness.store.count("sbomreports"), 1);
        let stored = harness.store.get("sbomreports", "a").unwrap();
        assert_eq!(stored["_event_type"], "MODIFIED");
        assert_eq!(stored["_cluster"], CLUSTER);
        assert_eq!(stored["_namespace"], "default");
        assert_eq!(stored["data"], object("a", "first"));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_raised() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        harness.store.fail_collection("sbomreports");

        let mapped = mapper::map_object(object("a", "first")).unwrap();
        assert!(
            !harness
                .upserter
                .upsert(&resource, mapped, EventType::Added)
                .await
        );
        assert_eq!(harness.store.count("sbomreports"), 0);
    }
}

mod importer_tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_documents_are_removed() {
        let harness = Harness::new();
        let resource = ResourceType::custom("configauditreports");
        for id in ["A", "B", "C"] {
            harness
                .upserter
                .upsert(
                    &resource,
                    mapper::map_object(object(id, id)).unwrap(),
                    EventType::Added,
                )
                .await;
        }

        let source = ScriptedSource::new(resource.clone())
            .with_listing(vec![object("A", "A"), object("C", "C")]);
        let summary = harness.importer.import_all(&source).await.unwrap();

        assert_eq!(harness.store.identifiers("configauditreports"), vec!["A", "C"]);
        assert_eq!(summary.listed, 2);
        assert_eq!(summary.upserted, 2);
        assert_eq!(summary.stale_removed, Some(1));
        for id in ["A", "C"] {
            assert_eq!(
                harness.store.get("configauditreports", id).unwrap()["_event_type"],
                "INITIAL_IMPORT"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_identifier_is_skipped() {
        let harness = Harness::new();
        let source = ScriptedSource::new(ResourceType::custom("sbomreports")).with_listing(vec![
            json!({"metadata": {"name": "no-uid"}}),
            object("a", "ok"),
        ]);

        let summary = harness.importer.import_all(&source).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.upserted, 1);
        assert_eq!(harness.store.identifiers("sbomreports"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_without_deleting() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        harness
            .upserter
            .upsert(
                &resource,
                mapper::map_object(object("a", "kept")).unwrap(),
                EventType::Added,
            )
            .await;

        let source = ScriptedSource::new(resource).with_failing_listing();
        assert!(harness.importer.import_all(&source).await.is_err());
        assert_eq!(harness.store.count("sbomreports"), 1);
    }

    #[tokio::test]
    async fn test_empty_listing_clears_collection() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        harness
            .upserter
            .upsert(
                &resource,
                mapper::map_object(object("gone", "gone")).unwrap(),
                EventType::Added,
            )
            .await;

        let source = ScriptedSource::new(resource);
        let summary = harness.importer.import_all(&source).await.unwrap();

        assert_eq!(summary.stale_removed, Some(1));
        assert_eq!(harness.store.count("sbomreports"), 0);
    }

    #[tokio::test]
    async fn test_failed_writes_still_count_as_live() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        harness
            .upserter
            .upsert(
                &resource,
                mapper::map_object(object("a", "a")).unwrap(),
                EventType::Added,
            )
            .await;
        harness.store.fail_collection("sbomreports");

        let source = ScriptedSource::new(resource).with_listing(vec![object("a", "a")]);
        let summary = harness.importer.import_all(&source).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.stale_removed, None);

        harness.store.restore_collection("sbomreports");
        assert_eq!(harness.store.identifiers("sbomreports"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stale_delete_scoped_to_cluster() {
        let harness = Harness::with_import_config(ImportConfig {
            scope_stale_delete_to_cluster: true,
        });
        harness
            .store
            .upsert(
                "namespaces",
                "other",
                json!({"_uid": "other", "_cluster": "another-cluster"}),
            )
            .await
            .unwrap();
        harness
            .store
            .upsert(
                "namespaces",
                "mine",
                json!({"_uid": "mine", "_cluster": CLUSTER}),
            )
            .await
            .unwrap();

        let source = ScriptedSource::new(ResourceType::namespaces())
            .with_listing(vec![namespace("u1", "default")]);
        harness.importer.import_all(&source).await.unwrap();

        assert_eq!(harness.store.identifiers("namespaces"), vec!["other", "u1"]);
    }

    #[tokio::test]
    async fn test_unscoped_stale_delete_ignores_cluster() {
        let harness = Harness::new();
        harness
            .store
            .upsert(
                "namespaces",
                "other",
                json!({"_uid": "other", "_cluster": "another-cluster"}),
            )
            .await
            .unwrap();

        let source = ScriptedSource::new(ResourceType::namespaces())
            .with_listing(vec![namespace("u1", "default")]);
        harness.importer.import_all(&source).await.unwrap();

        assert_eq!(harness.store.identifiers("namespaces"), vec!["u1"]);
    }
}

mod watcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_event_types_are_recorded() {
        let harness = Harness::new();
        let resource = ResourceType::custom("exposedsecretreports");
        let stream = futures::stream::iter(vec![
            Ok(SourceEvent::new(WatchEventKind::Added, object("a", "a"))),
            Ok(SourceEvent::new(WatchEventKind::Modified, object("b", "b"))),
            Ok(SourceEvent::new(WatchEventKind::Deleted, object("a", "a"))),
        ])
        .boxed();

        let outcome = harness.watcher.consume(&resource, stream).await;

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.written, 3);
        assert_eq!(outcome.stream_error, None);
        // Deleted objects stay in the store, tagged DELETED
        let deleted = harness.store.get("exposedsecretreports", "a").unwrap();
        assert_eq!(deleted["_event_type"], "DELETED");
        assert_eq!(
            harness.store.get("exposedsecretreports", "b").unwrap()["_event_type"],
            "MODIFIED"
        );
    }

    #[tokio::test]
    async fn test_events_without_object_are_skipped() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        let stream = futures::stream::iter(vec![
            Ok(SourceEvent::without_object(WatchEventKind::Bookmark)),
            Ok(SourceEvent::without_object(WatchEventKind::Error)),
            Ok(SourceEvent::new(WatchEventKind::Bookmark, json!({"metadata": {"uid": "x"}}))),
            Ok(SourceEvent::new(WatchEventKind::Added, json!({"metadata": {"name": "no-uid"}}))),
            Ok(SourceEvent::new(WatchEventKind::Added, object("a", "a"))),
        ])
        .boxed();

        let outcome = harness.watcher.consume(&resource, stream).await;

        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.written, 1);
        assert_eq!(harness.store.identifiers("sbomreports"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stream_error_ends_session() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        let stream = futures::stream::iter(vec![
            Ok(SourceEvent::new(WatchEventKind::Added, object("a", "a"))),
            Err(SyncError::upstream("connection reset")),
            Ok(SourceEvent::new(WatchEventKind::Added, object("b", "b"))),
        ])
        .boxed();

        let outcome = harness.watcher.consume(&resource, stream).await;

        assert_eq!(outcome.processed, 1);
        assert!(outcome.stream_error.unwrap().contains("connection reset"));
        assert_eq!(harness.store.identifiers("sbomreports"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_reconnect_delivers_all_events() {
        let harness = Harness::new();
        let resource = ResourceType::custom("vulnerabilityreports");
        let first: Vec<SourceEvent> = (0..3)
            .map(|i| SourceEvent::new(WatchEventKind::Added, object(&format!("n{i}"), "n")))
            .collect();
        let second: Vec<SourceEvent> = (0..4)
            .map(|i| SourceEvent::new(WatchEventKind::Modified, object(&format!("m{i}"), "m")))
            .collect();
        let source = Arc::new(
            ScriptedSource::new(resource)
                .with_session(first)
                .with_session(second),
        );

        let watcher = harness.watcher.clone();
        let watched: Arc<dyn ResourceSource> = source.clone();
        let task = tokio::spawn(async move { watcher.run(watched).await });

        let store = harness.store.clone();
        assert!(wait_until(|| store.write_count() == 7).await);
        assert!(wait_until(|| source.watch_calls() >= 3).await);
        task.abort();

        assert_eq!(harness.store.write_count(), 7);
        assert_eq!(harness.store.count("vulnerabilityreports"), 7);
    }

    #[tokio::test]
    async fn test_replayed_events_collapse_by_key() {
        let harness = Harness::new();
        let resource = ResourceType::custom("sbomreports");
        let replay = vec![
            SourceEvent::new(WatchEventKind::Added, object("a", "a")),
            SourceEvent::new(WatchEventKind::Added, object("b", "b")),
        ];
        let source = Arc::new(
            ScriptedSource::new(resource)
                .with_session(replay.clone())
                .with_session(replay),
        );

        let watcher = harness.watcher.clone();
        let watched: Arc<dyn ResourceSource> = source.clone();
        let task = tokio::spawn(async move { watcher.run(watched).await });

        let store = harness.store.clone();
        assert!(wait_until(|| store.write_count() == 4).await);
        task.abort();

        assert_eq!(harness.store.count("sbomreports"), 2);
    }

    #[tokio::test]
    async fn test_open_failure_retries_and_degrades_health() {
        let harness = Harness::new();
        let resource = ResourceType::custom("rbacassessmentreports");
        let source = Arc::new(
            ScriptedSource::new(resource.clone())
                .with_open_failure()
                .with_open_failure()
                .with_raw_session(vec![Ok(SourceEvent::new(
                    WatchEventKind::Added,
                    object("a", "a"),
                ))]),
        );

        let watcher = harness.watcher.clone();
        let watched: Arc<dyn ResourceSource> = source.clone();
        let task = tokio::spawn(async move { watcher.run(watched).await });

        let store = harness.store.clone();
        assert!(wait_until(|| store.write_count() == 1).await);
        assert!(source.watch_calls() >= 3);
        task.abort();

        let health = harness.health.health().await;
        assert_eq!(
            health.components[&components::resource(&resource)].status,
            ComponentStatus::Healthy
        );
    }
}

mod supervisor_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_failure_does_not_block_other_types() {
        let harness = Harness::new();
        harness.store.fail_collection("sbomreports");

        let failing: Arc<dyn ResourceSource> = Arc::new(
            ScriptedSource::new(ResourceType::custom("sbomreports"))
                .with_listing(vec![object("x1", "x1")])
                .with_session(vec![SourceEvent::new(
                    WatchEventKind::Added,
                    object("x2", "x2"),
                )]),
        );
        let healthy: Arc<dyn ResourceSource> = Arc::new(
            ScriptedSource::new(ResourceType::custom("configauditreports"))
                .with_listing(vec![object("y1", "y1")])
                .with_session(vec![SourceEvent::new(
                    WatchEventKind::Added,
                    object("y2", "y2"),
                )]),
        );

        let supervisor = harness.supervisor(vec![failing, healthy]);
        let mut tasks = supervisor.start().await;

        let store = harness.store.clone();
        assert!(wait_until(|| store.count("configauditreports") == 2).await);
        tasks.abort_all();

        assert_eq!(harness.store.count("sbomreports"), 0);
        assert_eq!(
            harness.store.identifiers("configauditreports"),
            vec!["y1", "y2"]
        );
    }

    #[tokio::test]
    async fn test_watcher_starts_after_failed_import() {
        let harness = Harness::new();
        let resource = ResourceType::custom("clustersbomreports");
        let source = Arc::new(
            ScriptedSource::new(resource.clone())
                .with_failing_listing()
                .with_session(vec![SourceEvent::new(
                    WatchEventKind::Added,
                    object("a", "a"),
                )]),
        );

        let supervisor = harness.supervisor(vec![source.clone() as Arc<dyn ResourceSource>]);
        let mut tasks = supervisor.start().await;

        let store = harness.store.clone();
        assert!(wait_until(|| store.count("clustersbomreports") == 1).await);
        tasks.abort_all();

        assert!(harness.health.readiness().await.ready);
        let health = harness.health.health().await;
        assert_eq!(
            health.components[&components::resource(&resource)].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_import_runs_before_watch() {
        let harness = Harness::new();
        let source = Arc::new(
            ScriptedSource::new(ResourceType::custom("sbomreports"))
                .with_listing(vec![object("a", "a")]),
        );

        let supervisor = harness.supervisor(vec![source.clone() as Arc<dyn ResourceSource>]);
        assert_eq!(
            supervisor.resource_types(),
            vec![ResourceType::custom("sbomreports")]
        );

        // Before start nothing has been listed or watched
        assert_eq!(source.watch_calls(), 0);
        let mut tasks = supervisor.start().await;

        // The import finished synchronously inside start()
        assert_eq!(harness.store.identifiers("sbomreports"), vec!["a"]);
        assert!(wait_until(|| source.watch_calls() == 1).await);
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_periodic_resync_removes_stale_documents() {
        let harness = Harness::new();
        let source = Arc::new(
            ScriptedSource::new(ResourceType::custom("sbomreports"))
                .with_listing(vec![object("a", "a"), object("b", "b")]),
        );

        let supervisor = Supervisor::new(
            vec![source.clone() as Arc<dyn ResourceSource>],
            harness.importer.clone(),
            harness.watcher.clone(),
            harness.health.clone(),
            SupervisorConfig {
                resync_interval: Some(Duration::from_millis(20)),
            },
        );
        let mut tasks = supervisor.start().await;
        assert_eq!(harness.store.count("sbomreports"), 2);

        *source.listing.lock().unwrap() = Some(vec![object("a", "a")]);

        let store = harness.store.clone();
        assert!(wait_until(|| store.count("sbomreports") == 1).await);
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_namespace_import_then_modify() {
        let harness = Harness::new();
        let source = Arc::new(
            ScriptedSource::new(ResourceType::namespaces())
                .with_listing(vec![namespace("u1", "default"), namespace("u2", "kube-system")])
                .with_session(vec![SourceEvent::new(
                    WatchEventKind::Modified,
                    json!({
                        "apiVersion": "v1",
                        "kind": "Namespace",
                        "metadata": {"uid": "u1", "name": "default", "labels": {"env": "prod"}}
                    }),
                )]),
        );

        let supervisor = harness.supervisor(vec![source.clone() as Arc<dyn ResourceSource>]);
        let mut tasks = supervisor.start().await;

        assert_eq!(harness.store.count("namespaces"), 2);
        let u2_before = harness.store.get("namespaces", "u2").unwrap();
        assert_eq!(u2_before["_event_type"], "INITIAL_IMPORT");
        assert_eq!(u2_before["_resource_type"], "namespace");

        let store = harness.store.clone();
        assert!(
            wait_until(|| {
                store
                    .get("namespaces", "u1")
                    .map(|doc| doc["_event_type"] == "MODIFIED")
                    .unwrap_or(false)
            })
            .await
        );
        tasks.abort_all();

        let u1 = harness.store.get("namespaces", "u1").unwrap();
        assert_eq!(u1["data"]["metadata"]["labels"]["env"], "prod");
        assert_eq!(u1["_name"], "default");
        assert_eq!(harness.store.get("namespaces", "u2").unwrap(), u2_before);
        assert_eq!(harness.store.count("namespaces"), 2);
    }
}
