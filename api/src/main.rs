use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use common::cache::{RedisClient, RedisObjectCache, RedisOnChangeIndex};
use common::config::Settings;
use common::db::{DbPool, PostgresExtensionStore, PostgresTriggerIndex};
use common::metadata::HttpMetadataClient;
use common::queue::{NatsClient, NatsSchedulePublisher};
use common::service::ExtensionService;
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    // Initialize structured logging
    telemetry::init_logging(&config.observability.log_level)?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting extension API server"
    );

    // Initialize database connection pool and apply migrations
    let db_pool = DbPool::new(&config.database).await?;
    sqlx::migrate!("../migrations").run(db_pool.pool()).await?;
    tracing::info!("Database migrations applied");

    // Initialize Redis client (object cache + reverse index)
    let redis = RedisClient::new(&config.redis).await?;
    tracing::info!("Redis client initialized");

    // Initialize NATS client and make sure the dispatch stream exists
    let nats = NatsClient::new(config.nats.clone()).await?;
    nats.initialize_stream().await?;
    tracing::info!("NATS dispatch stream ready");

    // Initialize Prometheus metrics recorder
    let metrics_handle = telemetry::init_metrics_recorder()?;
    tracing::info!("Metrics recorder installed");

    // Wire the extension service
    let metadata = HttpMetadataClient::new(&config.metadata)?;
    let service = ExtensionService::new(
        Arc::new(PostgresExtensionStore::new(db_pool.clone())),
        Arc::new(PostgresTriggerIndex::new(db_pool.clone())),
        Arc::new(RedisObjectCache::new(redis.clone())),
        Arc::new(RedisOnChangeIndex::new(redis)),
        Arc::new(NatsSchedulePublisher::new(nats)),
        Arc::new(metadata),
    );

    let app_state = AppState::new(service, config.clone(), metrics_handle);

    // Create router
    let app = routes::create_router(app_state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    tracing::info!("Extension API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
