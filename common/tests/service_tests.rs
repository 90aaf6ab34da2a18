// Service-level tests over in-memory doubles of every injected
// collaborator: durable store, trigger index, both caches, dispatch
// queue, and the metadata client.

use async_trait::async_trait;
use common::cache::{ObjectCache, OnChangeIndex};
use common::db::repositories::{ExtensionStore, TriggerIndex};
use common::errors::{
    CacheError, DatabaseError, ExtensionError, MetadataError, QueueError, ValidationError,
};
use common::metadata::MetadataClient;
use common::models::{
    CreateExtension, Extension, ExtensionKind, ExtensionRecord, ExtensionSummary,
    TriggerDeclaration, TriggerType, Variable, VariableSpec,
};
use common::queue::SchedulePublisher;
use common::service::ExtensionService;
use serde_json::{json, Map};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// In-memory doubles
// ---------------------------------------------------------------------------

/// Relational store double: extension rows plus a (id, type, target)
/// trigger-row set with the same idempotent insert semantics as the SQL
#[derive(Default)]
struct MemoryBackend {
    extensions: Mutex<BTreeMap<String, ExtensionRecord>>,
    trigger_rows: Mutex<BTreeSet<(String, TriggerType, String)>>,
}

#[async_trait]
impl ExtensionStore for MemoryBackend {
    async fn create(
        &self,
        record: &ExtensionRecord,
        triggers: &[TriggerDeclaration],
    ) -> Result<(), DatabaseError> {
        let mut extensions = self.extensions.lock().unwrap();
        extensions
            .entry(record.extension_id.clone())
            .or_insert_with(|| record.clone());

        let mut rows = self.trigger_rows.lock().unwrap();
        for declaration in triggers {
            for target in &declaration.trigger_on {
                rows.insert((
                    record.extension_id.clone(),
                    declaration.trigger_type,
                    target.clone(),
                ));
            }
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        extension_id: &str,
    ) -> Result<Option<ExtensionRecord>, DatabaseError> {
        Ok(self.extensions.lock().unwrap().get(extension_id).cloned())
    }

    async fn find_by_ids(
        &self,
        extension_ids: &[String],
    ) -> Result<Vec<ExtensionRecord>, DatabaseError> {
        let extensions = self.extensions.lock().unwrap();
        Ok(extension_ids
            .iter()
            .filter_map(|id| extensions.get(id).cloned())
            .collect())
    }

    async fn delete(&self, extension_id: &str) -> Result<u64, DatabaseError> {
        let mut rows = self.trigger_rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(id, _, _)| id != extension_id);
        let removed = (before - rows.len()) as u64;

        self.extensions.lock().unwrap().remove(extension_id);
        Ok(removed)
    }
}

#[async_trait]
impl TriggerIndex for MemoryBackend {
    async fn triggers_for_extension(
        &self,
        extension_id: &str,
    ) -> Result<Vec<TriggerDeclaration>, DatabaseError> {
        let rows = self.trigger_rows.lock().unwrap();
        let mut by_type: BTreeMap<TriggerType, Vec<String>> = BTreeMap::new();
        for (id, trigger_type, target) in rows.iter() {
            if id == extension_id {
                by_type.entry(*trigger_type).or_default().push(target.clone());
            }
        }
        Ok(by_type
            .into_iter()
            .map(|(trigger_type, trigger_on)| TriggerDeclaration {
                trigger_type,
                trigger_on,
            })
            .collect())
    }

    async fn extensions_for_trigger(
        &self,
        trigger_type: TriggerType,
        target: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows = self.trigger_rows.lock().unwrap();
        let mut ids: Vec<String> = rows
            .iter()
            .filter(|(_, row_type, row_target)| {
                *row_type == trigger_type && target.map_or(true, |t| row_target == t)
            })
            .map(|(id, _, _)| id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn extensions_grouped_by_target(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<(String, Vec<String>)>, DatabaseError> {
        let rows = self.trigger_rows.lock().unwrap();
        let mut by_target: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, row_type, target) in rows.iter() {
            if *row_type == trigger_type {
                by_target.entry(target.clone()).or_default().push(id.clone());
            }
        }
        Ok(by_target
            .into_iter()
            .map(|(target, mut ids)| {
                ids.sort();
                ids.dedup();
                (target, ids)
            })
            .collect())
    }
}

#[derive(Default)]
struct MemoryObjectCache {
    entries: Mutex<HashMap<String, Extension>>,
    fail: AtomicBool,
}

impl MemoryObjectCache {
    fn check(&self) -> Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::RedisError("object cache down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn get(&self, extension_id: &str) -> Result<Option<Extension>, CacheError> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(extension_id).cloned())
    }

    async fn put(&self, extension: &Extension) -> Result<(), CacheError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(extension.extension_id.clone(), extension.clone());
        Ok(())
    }

    async fn invalidate(&self, extension_id: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().unwrap().remove(extension_id);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryOnChangeIndex {
    entries: Mutex<HashMap<String, BTreeMap<String, ExtensionSummary>>>,
    fail: AtomicBool,
}

impl MemoryOnChangeIndex {
    fn check(&self) -> Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::RedisError("reverse index down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OnChangeIndex for MemoryOnChangeIndex {
    async fn extensions_for_timeseries(
        &self,
        timeseries_id: &str,
    ) -> Result<Vec<ExtensionSummary>, CacheError> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(timeseries_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_extension(
        &self,
        timeseries_ids: &[String],
        summary: &ExtensionSummary,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        for timeseries_id in timeseries_ids {
            entries
                .entry(timeseries_id.clone())
                .or_default()
                .insert(summary.extension_id.clone(), summary.clone());
        }
        Ok(())
    }

    async fn populate(
        &self,
        timeseries_id: &str,
        summaries: &[ExtensionSummary],
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let target = entries.entry(timeseries_id.to_string()).or_default();
        for summary in summaries {
            target.insert(summary.extension_id.clone(), summary.clone());
        }
        Ok(())
    }

    async fn remove_extension(
        &self,
        timeseries_ids: &[String],
        extension_id: &str,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        for timeseries_id in timeseries_ids {
            if let Some(target) = entries.get_mut(timeseries_id) {
                target.remove(extension_id);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    records: Mutex<Vec<(String, ExtensionSummary)>>,
}

#[async_trait]
impl SchedulePublisher for RecordingPublisher {
    async fn enqueue_on_time(
        &self,
        target: &str,
        summary: &ExtensionSummary,
    ) -> Result<(), QueueError> {
        self.records
            .lock()
            .unwrap()
            .push((target.to_string(), summary.clone()));
        Ok(())
    }
}

/// Resolves timeseriesId specs to a document echoing the id, and metadata
/// specs to a freshly "created" document
struct StubMetadataClient;

#[async_trait]
impl MetadataClient for StubMetadataClient {
    async fn resolve_variable(&self, spec: &VariableSpec) -> Result<Variable, MetadataError> {
        let timeseries = if let Some(timeseries_id) = &spec.timeseries_id {
            json!({ "timeseriesId": timeseries_id })
        } else if spec.metadata.is_some() || spec.metadata_ids.is_some() {
            json!({ "timeseriesId": format!("created-{}", spec.variable_id) })
        } else {
            return Err(MetadataError::MissingSource(spec.variable_id.clone()));
        };
        Ok(Variable {
            variable_id: spec.variable_id.clone(),
            timeseries,
        })
    }
}

struct FailingMetadataClient;

#[async_trait]
impl MetadataClient for FailingMetadataClient {
    async fn resolve_variable(&self, spec: &VariableSpec) -> Result<Variable, MetadataError> {
        Err(MetadataError::ResolutionFailed {
            variable_id: spec.variable_id.clone(),
            reason: "metadata adapter unavailable".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    service: ExtensionService,
    backend: Arc<MemoryBackend>,
    object_cache: Arc<MemoryObjectCache>,
    on_change: Arc<MemoryOnChangeIndex>,
    publisher: Arc<RecordingPublisher>,
}

fn harness() -> Harness {
    harness_with_metadata(Arc::new(StubMetadataClient))
}

fn harness_with_metadata(metadata: Arc<dyn MetadataClient>) -> Harness {
    let backend = Arc::new(MemoryBackend::default());
    let object_cache = Arc::new(MemoryObjectCache::default());
    let on_change = Arc::new(MemoryOnChangeIndex::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let service = ExtensionService::new(
        backend.clone(),
        backend.clone(),
        object_cache.clone(),
        on_change.clone(),
        publisher.clone(),
        metadata,
    );

    Harness {
        service,
        backend,
        object_cache,
        on_change,
        publisher,
    }
}

fn on_change_document(extension_id: &str, targets: &[&str]) -> CreateExtension {
    CreateExtension {
        extension_id: extension_id.to_string(),
        kind: ExtensionKind::Transformation,
        function: "f1".to_string(),
        variables: vec![VariableSpec {
            variable_id: "v1".to_string(),
            metadata: None,
            metadata_ids: None,
            timeseries_id: Some(targets.first().copied().unwrap_or("ts1").to_string()),
        }],
        input_variables: vec!["v1".to_string()],
        output_variables: vec!["v1".to_string()],
        trigger: vec![TriggerDeclaration {
            trigger_type: TriggerType::OnChange,
            trigger_on: targets.iter().map(|t| t.to_string()).collect(),
        }],
        options: Map::new(),
    }
}

fn on_time_document(extension_id: &str, schedules: &[&str]) -> CreateExtension {
    let mut document = on_change_document(extension_id, &["ts1"]);
    document.trigger = vec![TriggerDeclaration {
        trigger_type: TriggerType::OnTime,
        trigger_on: schedules.iter().map(|s| s.to_string()).collect(),
    }];
    document
}

// ---------------------------------------------------------------------------
// Round-trip and read-through behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let h = harness();

    let mut document = on_change_document("ext1", &["ts1"]);
    document.options.insert("window".to_string(), json!(3600));

    let created = h.service.create(document.clone()).await.unwrap();
    let fetched = h.service.get("ext1").await.unwrap();

    assert_eq!(created, fetched);
    assert_eq!(fetched.extension_id, "ext1");
    assert_eq!(fetched.kind, ExtensionKind::Transformation);
    assert_eq!(fetched.input_variables, vec!["v1".to_string()]);
    assert_eq!(fetched.output_variables, vec!["v1".to_string()]);
    assert_eq!(fetched.options["window"], json!(3600));
    assert_eq!(fetched.variables[0].variable_id, "v1");
    assert_eq!(fetched.variables[0].timeseries["timeseriesId"], "ts1");
    assert_eq!(fetched.trigger, document.trigger);
}

#[tokio::test]
async fn test_get_unknown_extension_is_not_found() {
    let h = harness();
    let result = h.service.get("ghost").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}

#[tokio::test]
async fn test_cached_and_reconstructed_reads_agree() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1", "ts2"]))
        .await
        .unwrap();

    let from_cache = h.service.get("ext1").await.unwrap();

    // Drop the cache entry; the next read rebuilds from store + index
    h.object_cache.entries.lock().unwrap().clear();
    let reconstructed = h.service.get("ext1").await.unwrap();

    assert_eq!(from_cache, reconstructed);

    // The rebuild repopulated the cache
    assert!(h.object_cache.entries.lock().unwrap().contains_key("ext1"));
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    h.object_cache.fail.store(true, Ordering::SeqCst);
    let fetched = h.service.get("ext1").await.unwrap();
    assert_eq!(fetched.extension_id, "ext1");
}

// ---------------------------------------------------------------------------
// Creation semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_create_is_a_silent_no_op() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    let mut second = on_change_document("ext1", &["ts1"]);
    second.function = "f2".to_string();
    let result = h.service.create(second).await;
    assert!(result.is_ok());

    // First committed record wins
    h.object_cache.entries.lock().unwrap().clear();
    let fetched = h.service.get("ext1").await.unwrap();
    assert_eq!(fetched.function, "f1");
}

#[tokio::test]
async fn test_undeclared_input_variable_rejected_before_write() {
    let h = harness();
    let mut document = on_change_document("ext1", &["ts1"]);
    document.input_variables.push("v9".to_string());

    let result = h.service.create(document).await;
    assert!(matches!(
        result,
        Err(ExtensionError::Validation(
            ValidationError::UndeclaredVariable { .. }
        ))
    ));
    assert!(h.backend.extensions.lock().unwrap().is_empty());
    assert!(h.backend.trigger_rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_trigger_rejected() {
    let h = harness();
    let mut document = on_change_document("ext1", &["ts1"]);
    document.trigger.clear();

    let result = h.service.create(document).await;
    assert!(matches!(
        result,
        Err(ExtensionError::Validation(ValidationError::MissingTrigger))
    ));
}

#[tokio::test]
async fn test_resolution_failure_rejects_create_before_write() {
    let h = harness_with_metadata(Arc::new(FailingMetadataClient));

    let result = h.service.create(on_change_document("ext1", &["ts1"])).await;
    assert!(matches!(result, Err(ExtensionError::VariableResolution(_))));
    assert!(h.backend.extensions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_variables_resolve_through_metadata_collaborator() {
    let h = harness();
    let mut document = on_change_document("ext1", &["ts1"]);
    document.variables.push(VariableSpec {
        variable_id: "v2".to_string(),
        metadata: Some(json!({"location": "station-7"})),
        metadata_ids: None,
        timeseries_id: None,
    });

    let created = h.service.create(document).await.unwrap();
    assert_eq!(created.variables[1].timeseries["timeseriesId"], "created-v2");
}

#[tokio::test]
async fn test_cache_fan_out_failure_does_not_fail_create() {
    let h = harness();
    h.object_cache.fail.store(true, Ordering::SeqCst);
    h.on_change.fail.store(true, Ordering::SeqCst);

    let result = h.service.create(on_change_document("ext1", &["ts1"])).await;
    assert!(result.is_ok());

    // The caches heal on the next read once they are reachable again
    h.object_cache.fail.store(false, Ordering::SeqCst);
    h.on_change.fail.store(false, Ordering::SeqCst);

    let summaries = h.service.extensions_for_timeseries("ts1").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].extension_id, "ext1");
}

// ---------------------------------------------------------------------------
// Trigger aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_declarations_of_one_type_aggregate_into_one_group() {
    let h = harness();
    let mut document = on_change_document("ext1", &["ts1"]);
    document.trigger = vec![
        TriggerDeclaration {
            trigger_type: TriggerType::OnChange,
            trigger_on: vec!["ts1".to_string()],
        },
        TriggerDeclaration {
            trigger_type: TriggerType::OnChange,
            trigger_on: vec!["ts2".to_string()],
        },
    ];

    h.service.create(document).await.unwrap();

    // Cached view and store reconstruction both show one merged group
    let cached = h.service.get("ext1").await.unwrap();
    h.object_cache.entries.lock().unwrap().clear();
    let reconstructed = h.service.get("ext1").await.unwrap();

    let expected = vec![TriggerDeclaration {
        trigger_type: TriggerType::OnChange,
        trigger_on: vec!["ts1".to_string(), "ts2".to_string()],
    }];
    assert_eq!(cached.trigger, expected);
    assert_eq!(reconstructed.trigger, expected);
}

// ---------------------------------------------------------------------------
// Reverse index completeness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reverse_index_includes_extension_after_create() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1", "ts2"]))
        .await
        .unwrap();

    for target in ["ts1", "ts2"] {
        let summaries = h.service.extensions_for_timeseries(target).await.unwrap();
        assert_eq!(summaries.len(), 1, "missing entry for {}", target);
        assert_eq!(summaries[0].extension_id, "ext1");
    }
}

#[tokio::test]
async fn test_reverse_index_rebuilds_after_entry_loss() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    // Simulate a lost index entry; the read path must rebuild from the store
    h.on_change.entries.lock().unwrap().clear();

    let summaries = h.service.extensions_for_timeseries("ts1").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].extension_id, "ext1");

    // And the rebuild repopulated the index
    assert!(h.on_change.entries.lock().unwrap().contains_key("ts1"));
}

#[tokio::test]
async fn test_delete_prunes_only_the_deleted_extension() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1", "ts2"]))
        .await
        .unwrap();
    h.service
        .create(on_change_document("ext2", &["ts1"]))
        .await
        .unwrap();

    h.service.delete("ext1").await.unwrap();

    let remaining = h.service.extensions_for_timeseries("ts1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].extension_id, "ext2");

    let result = h.service.extensions_for_timeseries("ts2").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}

#[tokio::test]
async fn test_query_for_unregistered_timeseries_is_not_found() {
    let h = harness();
    let result = h.service.extensions_for_timeseries("ts1").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Delete semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    assert_eq!(h.service.delete("ext1").await.unwrap(), "ext1");
    assert_eq!(h.service.delete("ext1").await.unwrap(), "ext1");

    // Deleting an id that never existed behaves the same
    assert_eq!(h.service.delete("ghost").await.unwrap(), "ghost");
}

#[tokio::test]
async fn test_delete_invalidates_object_cache() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();
    assert!(h.object_cache.entries.lock().unwrap().contains_key("ext1"));

    h.service.delete("ext1").await.unwrap();
    assert!(!h.object_cache.entries.lock().unwrap().contains_key("ext1"));

    let result = h.service.get("ext1").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_prunes_index_when_object_cache_is_cold() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    // Trigger list must come from the trigger index when the cache is cold
    h.object_cache.entries.lock().unwrap().clear();
    h.service.delete("ext1").await.unwrap();

    let result = h.service.extensions_for_timeseries("ts1").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}

// ---------------------------------------------------------------------------
// OnTime dispatch and batch query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_on_time_create_enqueues_one_record_per_target() {
    let h = harness();
    h.service
        .create(on_time_document("ext1", &["daily", "hourly"]))
        .await
        .unwrap();

    let records = h.publisher.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    let targets: Vec<&str> = records.iter().map(|(t, _)| t.as_str()).collect();
    assert!(targets.contains(&"daily"));
    assert!(targets.contains(&"hourly"));
    assert!(records.iter().all(|(_, s)| s.extension_id == "ext1"));
}

#[tokio::test]
async fn test_on_change_create_enqueues_nothing() {
    let h = harness();
    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    assert!(h.publisher.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_on_time_schedule_groups_by_target() {
    let h = harness();
    h.service
        .create(on_time_document("ext1", &["daily"]))
        .await
        .unwrap();
    h.service
        .create(on_time_document("ext2", &["daily", "hourly"]))
        .await
        .unwrap();

    let groups = h.service.on_time_schedule().await.unwrap();
    assert_eq!(groups.len(), 2);

    let daily = groups.iter().find(|g| g.trigger_on == "daily").unwrap();
    let daily_ids: Vec<&str> = daily
        .extensions
        .iter()
        .map(|s| s.extension_id.as_str())
        .collect();
    assert_eq!(daily_ids, vec!["ext1", "ext2"]);

    let hourly = groups.iter().find(|g| g.trigger_on == "hourly").unwrap();
    assert_eq!(hourly.extensions.len(), 1);
    assert_eq!(hourly.extensions[0].extension_id, "ext2");
}

#[tokio::test]
async fn test_on_time_schedule_is_empty_without_registrations() {
    let h = harness();
    assert!(h.service.on_time_schedule().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// The concrete ext1/ts1 scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_on_change_lifecycle_scenario() {
    let h = harness();

    h.service
        .create(on_change_document("ext1", &["ts1"]))
        .await
        .unwrap();

    let registered = h.service.extensions_for_timeseries("ts1").await.unwrap();
    assert!(registered.iter().any(|s| s.extension_id == "ext1"));

    assert_eq!(h.service.delete("ext1").await.unwrap(), "ext1");

    let result = h.service.extensions_for_timeseries("ts1").await;
    assert!(matches!(result, Err(ExtensionError::NotFound(_))));
}
