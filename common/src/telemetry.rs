// Telemetry: structured logging and Prometheus metrics

use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus recorder and register metric descriptions.
/// The returned handle renders the scrape output for `/metrics`.
pub fn init_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        "extension_created_total",
        "Total number of extensions created"
    );
    describe_counter!(
        "extension_deleted_total",
        "Total number of extension delete requests"
    );
    describe_counter!(
        "extension_cache_hits_total",
        "Cache hits, labeled by cache"
    );
    describe_counter!(
        "extension_cache_misses_total",
        "Cache misses, labeled by cache"
    );
    describe_counter!(
        "extension_fanout_failures_total",
        "Best-effort fan-out failures, labeled by sink"
    );

    Ok(handle)
}

/// Record a successful extension creation
#[inline]
pub fn record_extension_created(kind: &str) {
    counter!("extension_created_total", "kind" => kind.to_string()).increment(1);
}

/// Record an extension delete request
#[inline]
pub fn record_extension_deleted() {
    counter!("extension_deleted_total").increment(1);
}

/// Record a read served from a cache
#[inline]
pub fn record_cache_hit(cache: &'static str) {
    counter!("extension_cache_hits_total", "cache" => cache).increment(1);
}

/// Record a read that fell through to the store
#[inline]
pub fn record_cache_miss(cache: &'static str) {
    counter!("extension_cache_misses_total", "cache" => cache).increment(1);
}

/// Record a failed best-effort fan-out write
#[inline]
pub fn record_fan_out_failure(sink: &'static str) {
    counter!("extension_fanout_failures_total", "sink" => sink).increment(1);
}
