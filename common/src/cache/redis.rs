// Redis client wrapper shared by the object cache and reverse index

use crate::config::RedisConfig;
use crate::errors::CacheError;
use redis::aio::ConnectionManager;
use redis::Client;
use std::sync::Arc;
use tracing::{info, instrument};

/// Redis client with automatic reconnection via the connection manager
#[derive(Clone)]
pub struct RedisClient {
    manager: Arc<ConnectionManager>,
}

impl RedisClient {
    #[instrument(skip(config))]
    pub async fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        info!(url = %config.url, "Connecting to Redis");

        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::RedisError(format!("Failed to create Redis client: {}", e)))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::RedisError(format!("Failed to connect to Redis: {}", e)))?;

        info!("Redis connection established");
        Ok(Self {
            manager: Arc::new(manager),
        })
    }

    /// Get a connection handle from the manager
    pub fn get_connection(&self) -> ConnectionManager {
        (*self.manager).clone()
    }

    /// Health check - ping Redis
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), CacheError> {
        use redis::cmd;

        let mut conn = self.get_connection();
        cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| CacheError::RedisError(format!("Redis health check failed: {}", e)))?;

        Ok(())
    }
}
