// Extension service: the orchestration layer over the durable store, the
// two caches, the dispatch queue, and the metadata collaborator.
//
// Writes follow a primary-durable-write-then-best-effort-fan-out pattern:
// the store commit always precedes any cache visibility of it, and cache
// or queue failures after a commit are logged, never surfaced. Both caches
// are rebuildable from the store plus the trigger index.

use crate::db::repositories::{ExtensionStore, TriggerIndex};
use crate::cache::{ObjectCache, OnChangeIndex};
use crate::errors::ExtensionError;
use crate::metadata::MetadataClient;
use crate::models::{
    normalize_triggers, CreateExtension, Extension, ExtensionData, ExtensionRecord,
    ExtensionSummary, TriggerGroup, TriggerType,
};
use crate::queue::SchedulePublisher;
use crate::telemetry;
use chrono::Utc;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Orchestrates extension create/read/delete and the trigger queries.
/// All collaborators are injected, so tests can substitute doubles.
pub struct ExtensionService {
    store: Arc<dyn ExtensionStore>,
    trigger_index: Arc<dyn TriggerIndex>,
    object_cache: Arc<dyn ObjectCache>,
    on_change_index: Arc<dyn OnChangeIndex>,
    dispatcher: Arc<dyn SchedulePublisher>,
    metadata: Arc<dyn MetadataClient>,
}

impl ExtensionService {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        trigger_index: Arc<dyn TriggerIndex>,
        object_cache: Arc<dyn ObjectCache>,
        on_change_index: Arc<dyn OnChangeIndex>,
        dispatcher: Arc<dyn SchedulePublisher>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        Self {
            store,
            trigger_index,
            object_cache,
            on_change_index,
            dispatcher,
            metadata,
        }
    }

    /// Create an extension: validate, resolve variables, persist the
    /// extension and trigger rows atomically, then fan out to the caches
    /// and the dispatch queue.
    ///
    /// A colliding extension id is a silent no-op: the first committed
    /// record wins and no error is surfaced.
    #[instrument(skip(self, request), fields(extension_id = %request.extension_id))]
    pub async fn create(&self, request: CreateExtension) -> Result<Extension, ExtensionError> {
        request.validate()?;

        let variables = try_join_all(
            request
                .variables
                .iter()
                .map(|spec| self.metadata.resolve_variable(spec)),
        )
        .await?;

        let triggers = normalize_triggers(request.trigger);
        let record = ExtensionRecord {
            extension_id: request.extension_id,
            kind: request.kind,
            function: request.function,
            data: ExtensionData {
                variables,
                input_variables: request.input_variables,
                output_variables: request.output_variables,
            },
            options: request.options,
            created_at: Utc::now(),
        };

        self.store.create(&record, &triggers).await?;
        telemetry::record_extension_created(record.kind.as_str());

        let extension = record.into_extension(triggers);
        self.fan_out(&extension).await;

        Ok(extension)
    }

    /// Propagate a committed create to the object cache, the reverse
    /// index, and the dispatch queue. Failures here leave a stale or
    /// missing cache that heals on the next read; the durable record is
    /// already in place.
    async fn fan_out(&self, extension: &Extension) {
        if let Err(e) = self.object_cache.put(extension).await {
            warn!(
                extension_id = %extension.extension_id,
                error = %e,
                "Object cache population failed"
            );
            telemetry::record_fan_out_failure("object_cache");
        }

        let summary = extension.summary();
        for declaration in &extension.trigger {
            match declaration.trigger_type {
                TriggerType::OnChange => {
                    if let Err(e) = self
                        .on_change_index
                        .add_extension(&declaration.trigger_on, &summary)
                        .await
                    {
                        warn!(
                            extension_id = %extension.extension_id,
                            error = %e,
                            "Reverse index fan-out failed"
                        );
                        telemetry::record_fan_out_failure("on_change_index");
                    }
                }
                TriggerType::OnTime => {
                    for target in &declaration.trigger_on {
                        if let Err(e) = self.dispatcher.enqueue_on_time(target, &summary).await {
                            warn!(
                                extension_id = %extension.extension_id,
                                trigger_on = %target,
                                error = %e,
                                "Dispatch enqueue failed"
                            );
                            telemetry::record_fan_out_failure("dispatch_queue");
                        }
                    }
                }
            }
        }
    }

    /// Get the assembled extension, read-through: object cache hit, else
    /// reconstruct from the store and trigger index and populate the cache
    #[instrument(skip(self))]
    pub async fn get(&self, extension_id: &str) -> Result<Extension, ExtensionError> {
        match self.object_cache.get(extension_id).await {
            Ok(Some(extension)) => {
                telemetry::record_cache_hit("object");
                return Ok(extension);
            }
            Ok(None) => telemetry::record_cache_miss("object"),
            Err(e) => {
                warn!(extension_id, error = %e, "Object cache read failed");
            }
        }

        let record = self
            .store
            .find_by_id(extension_id)
            .await?
            .ok_or_else(|| ExtensionError::NotFound(format!("extension {}", extension_id)))?;
        let triggers = self.trigger_index.triggers_for_extension(extension_id).await?;

        let extension = record.into_extension(triggers);
        if let Err(e) = self.object_cache.put(&extension).await {
            warn!(extension_id, error = %e, "Object cache population failed");
        }

        Ok(extension)
    }

    /// Delete an extension and prune every derived copy. The trigger list
    /// is read before the durable delete: it is the only record of which
    /// reverse-index entries need pruning. Cache invalidation is issued
    /// strictly after the delete commits.
    ///
    /// Deleting an absent id is a no-op; the id is echoed back either way.
    #[instrument(skip(self))]
    pub async fn delete(&self, extension_id: &str) -> Result<String, ExtensionError> {
        let triggers = match self.object_cache.get(extension_id).await {
            Ok(Some(extension)) => extension.trigger,
            Ok(None) => self.trigger_index.triggers_for_extension(extension_id).await?,
            Err(e) => {
                warn!(extension_id, error = %e, "Object cache read failed");
                self.trigger_index.triggers_for_extension(extension_id).await?
            }
        };

        self.store.delete(extension_id).await?;
        telemetry::record_extension_deleted();

        for declaration in &triggers {
            if declaration.trigger_type == TriggerType::OnChange {
                if let Err(e) = self
                    .on_change_index
                    .remove_extension(&declaration.trigger_on, extension_id)
                    .await
                {
                    warn!(extension_id, error = %e, "Reverse index prune failed");
                    telemetry::record_fan_out_failure("on_change_index");
                }
            }
        }

        if let Err(e) = self.object_cache.invalidate(extension_id).await {
            warn!(extension_id, error = %e, "Object cache invalidation failed");
            telemetry::record_fan_out_failure("object_cache");
        }

        Ok(extension_id.to_string())
    }

    /// Every extension registered OnChange for a timeseries,
    /// reverse-index-accelerated with rebuild on miss
    #[instrument(skip(self))]
    pub async fn extensions_for_timeseries(
        &self,
        timeseries_id: &str,
    ) -> Result<Vec<ExtensionSummary>, ExtensionError> {
        match self.on_change_index.extensions_for_timeseries(timeseries_id).await {
            Ok(summaries) if !summaries.is_empty() => {
                telemetry::record_cache_hit("on_change");
                return Ok(summaries);
            }
            Ok(_) => telemetry::record_cache_miss("on_change"),
            Err(e) => {
                warn!(timeseries_id, error = %e, "Reverse index read failed");
            }
        }

        let extension_ids = self
            .trigger_index
            .extensions_for_trigger(TriggerType::OnChange, Some(timeseries_id))
            .await?;
        if extension_ids.is_empty() {
            return Err(ExtensionError::NotFound(format!(
                "no OnChange extensions for timeseries {}",
                timeseries_id
            )));
        }

        let records = self.store.find_by_ids(&extension_ids).await?;
        let summaries: Vec<ExtensionSummary> =
            records.iter().map(ExtensionSummary::from).collect();

        if let Err(e) = self
            .on_change_index
            .populate(timeseries_id, &summaries)
            .await
        {
            warn!(timeseries_id, error = %e, "Reverse index rebuild failed");
        }

        Ok(summaries)
    }

    /// All OnTime schedule targets grouped with their extensions, for
    /// scheduler bootstrap and resync. One batch record load over the
    /// deduplicated id set.
    #[instrument(skip(self))]
    pub async fn on_time_schedule(&self) -> Result<Vec<TriggerGroup>, ExtensionError> {
        let groups = self
            .trigger_index
            .extensions_grouped_by_target(TriggerType::OnTime)
            .await?;

        let mut extension_ids: Vec<String> = groups
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect();
        extension_ids.sort();
        extension_ids.dedup();

        let records = self.store.find_by_ids(&extension_ids).await?;
        let summaries: HashMap<&str, ExtensionSummary> = records
            .iter()
            .map(|record| (record.extension_id.as_str(), ExtensionSummary::from(record)))
            .collect();

        Ok(groups
            .into_iter()
            .map(|(trigger_on, ids)| TriggerGroup {
                trigger_on,
                extensions: ids
                    .iter()
                    .filter_map(|id| summaries.get(id.as_str()).cloned())
                    .collect(),
            })
            .collect())
    }
}
