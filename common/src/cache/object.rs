// Object cache: read-through, write-aside cache of assembled extensions

use crate::cache::RedisClient;
use crate::errors::CacheError;
use crate::models::Extension;
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::instrument;

const OBJECT_KEY_PREFIX: &str = "extension:obj:";

// Entries are disposable and rebuilt on miss; a TTL keeps orphans from
// accumulating if an invalidation is ever lost.
const OBJECT_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Cache of the fully assembled extension, keyed by extension id.
/// Never the source of truth: misses are rebuilt from the store.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    async fn get(&self, extension_id: &str) -> Result<Option<Extension>, CacheError>;

    async fn put(&self, extension: &Extension) -> Result<(), CacheError>;

    async fn invalidate(&self, extension_id: &str) -> Result<(), CacheError>;
}

/// Redis-backed object cache
#[derive(Clone)]
pub struct RedisObjectCache {
    redis: RedisClient,
}

impl RedisObjectCache {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn object_key(extension_id: &str) -> String {
        format!("{}{}", OBJECT_KEY_PREFIX, extension_id)
    }
}

#[async_trait]
impl ObjectCache for RedisObjectCache {
    #[instrument(skip(self))]
    async fn get(&self, extension_id: &str) -> Result<Option<Extension>, CacheError> {
        let mut conn = self.redis.get_connection();
        let payload: Option<String> = conn.get(Self::object_key(extension_id)).await?;

        match payload {
            Some(json) => {
                let extension = serde_json::from_str(&json)
                    .map_err(|e| CacheError::SerializationFailed(e.to_string()))?;
                tracing::debug!(extension_id, "Object cache hit");
                Ok(Some(extension))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, extension), fields(extension_id = %extension.extension_id))]
    async fn put(&self, extension: &Extension) -> Result<(), CacheError> {
        let payload = serde_json::to_string(extension)
            .map_err(|e| CacheError::SerializationFailed(e.to_string()))?;

        let mut conn = self.redis.get_connection();
        conn.set_ex::<_, _, ()>(
            Self::object_key(&extension.extension_id),
            payload,
            OBJECT_TTL_SECONDS,
        )
        .await?;

        tracing::debug!(extension_id = %extension.extension_id, "Object cache populated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, extension_id: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.get_connection();
        conn.del::<_, ()>(Self::object_key(extension_id)).await?;

        tracing::debug!(extension_id, "Object cache invalidated");
        Ok(())
    }
}
