use std::sync::Arc;

use common::config::Settings;
use common::service::ExtensionService;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExtensionService>,
    pub config: Arc<Settings>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(
        service: ExtensionService,
        config: Settings,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
            metrics_handle,
        }
    }
}
