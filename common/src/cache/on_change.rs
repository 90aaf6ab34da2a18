// OnChange reverse index: timeseries id -> extensions to notify on change.
// Denormalized read optimization for the dispatch path; entries are
// advisory and rebuilt from the trigger index on miss.

use crate::cache::RedisClient;
use crate::errors::CacheError;
use crate::models::ExtensionSummary;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::instrument;

const ON_CHANGE_KEY_PREFIX: &str = "extension:onchange:";

/// Reverse index from timeseries id to the extensions registered OnChange
/// for it. An empty result is a miss: Redis cannot distinguish an absent
/// hash from an empty one, and both are answered by a rebuild.
#[async_trait]
pub trait OnChangeIndex: Send + Sync {
    async fn extensions_for_timeseries(
        &self,
        timeseries_id: &str,
    ) -> Result<Vec<ExtensionSummary>, CacheError>;

    /// Fan-out write: one entry per target of an OnChange declaration.
    /// Partial application on failure is tolerated by the read path.
    async fn add_extension(
        &self,
        timeseries_ids: &[String],
        summary: &ExtensionSummary,
    ) -> Result<(), CacheError>;

    /// Rebuild path: replace the target's entry set wholesale
    async fn populate(
        &self,
        timeseries_id: &str,
        summaries: &[ExtensionSummary],
    ) -> Result<(), CacheError>;

    /// Prune one extension from every listed target's entry set
    async fn remove_extension(
        &self,
        timeseries_ids: &[String],
        extension_id: &str,
    ) -> Result<(), CacheError>;
}

/// Redis-backed reverse index: one hash per timeseries id, fields keyed by
/// extension id holding the serialized summary
#[derive(Clone)]
pub struct RedisOnChangeIndex {
    redis: RedisClient,
}

impl RedisOnChangeIndex {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn index_key(timeseries_id: &str) -> String {
        format!("{}{}", ON_CHANGE_KEY_PREFIX, timeseries_id)
    }
}

#[async_trait]
impl OnChangeIndex for RedisOnChangeIndex {
    #[instrument(skip(self))]
    async fn extensions_for_timeseries(
        &self,
        timeseries_id: &str,
    ) -> Result<Vec<ExtensionSummary>, CacheError> {
        let mut conn = self.redis.get_connection();
        let entries: HashMap<String, String> =
            conn.hgetall(Self::index_key(timeseries_id)).await?;

        let mut summaries = Vec::with_capacity(entries.len());
        for payload in entries.into_values() {
            summaries.push(
                serde_json::from_str(&payload)
                    .map_err(|e| CacheError::SerializationFailed(e.to_string()))?,
            );
        }
        summaries.sort_by(|a: &ExtensionSummary, b: &ExtensionSummary| {
            a.extension_id.cmp(&b.extension_id)
        });

        tracing::debug!(timeseries_id, count = summaries.len(), "Reverse index read");
        Ok(summaries)
    }

    #[instrument(skip(self, summary), fields(extension_id = %summary.extension_id, targets = timeseries_ids.len()))]
    async fn add_extension(
        &self,
        timeseries_ids: &[String],
        summary: &ExtensionSummary,
    ) -> Result<(), CacheError> {
        if timeseries_ids.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_string(summary)
            .map_err(|e| CacheError::SerializationFailed(e.to_string()))?;

        let mut pipe = redis::pipe();
        for timeseries_id in timeseries_ids {
            pipe.hset(Self::index_key(timeseries_id), &summary.extension_id, &payload)
                .ignore();
        }

        let mut conn = self.redis.get_connection();
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!(
            extension_id = %summary.extension_id,
            targets = timeseries_ids.len(),
            "Reverse index fan-out applied"
        );
        Ok(())
    }

    #[instrument(skip(self, summaries), fields(count = summaries.len()))]
    async fn populate(
        &self,
        timeseries_id: &str,
        summaries: &[ExtensionSummary],
    ) -> Result<(), CacheError> {
        if summaries.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let payload = serde_json::to_string(summary)
                .map_err(|e| CacheError::SerializationFailed(e.to_string()))?;
            entries.push((summary.extension_id.clone(), payload));
        }

        let mut conn = self.redis.get_connection();
        conn.hset_multiple::<_, _, _, ()>(Self::index_key(timeseries_id), &entries)
            .await?;

        tracing::debug!(timeseries_id, count = summaries.len(), "Reverse index rebuilt");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_extension(
        &self,
        timeseries_ids: &[String],
        extension_id: &str,
    ) -> Result<(), CacheError> {
        if timeseries_ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for timeseries_id in timeseries_ids {
            pipe.hdel(Self::index_key(timeseries_id), extension_id)
                .ignore();
        }

        let mut conn = self.redis.get_connection();
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!(
            extension_id,
            targets = timeseries_ids.len(),
            "Reverse index pruned"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_format() {
        assert_eq!(
            RedisOnChangeIndex::index_key("ts1"),
            "extension:onchange:ts1"
        );
    }
}
