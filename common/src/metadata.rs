// Metadata service client: resolves extension variables to timeseries.
// A variable may carry a full metadata document or a metadataIds document
// (both create the timeseries via POST), or a timeseriesId looked up via
// GET. A present timeseriesId overrides a metadata-based resolution.

use crate::config::MetadataConfig;
use crate::errors::MetadataError;
use crate::models::{Variable, VariableSpec};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::instrument;

/// Resolves a variable spec against the metadata service. Any resolution
/// failure rejects the whole create before anything is written.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn resolve_variable(&self, spec: &VariableSpec) -> Result<Variable, MetadataError>;
}

/// HTTP client for the metadata adapter
pub struct HttpMetadataClient {
    client: Client,
    base_url: String,
}

impl HttpMetadataClient {
    pub fn new(config: &MetadataConfig) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                MetadataError::RequestFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self, document))]
    async fn create_timeseries(
        &self,
        variable_id: &str,
        document: &serde_json::Value,
    ) -> Result<serde_json::Value, MetadataError> {
        let response = self
            .client
            .post(format!("{}/timeseries", self.base_url))
            .json(document)
            .send()
            .await
            .map_err(|e| MetadataError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::ResolutionFailed {
                variable_id: variable_id.to_string(),
                reason: format!("timeseries creation returned {}: {}", status, body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MetadataError::InvalidResponse(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn lookup_timeseries(
        &self,
        variable_id: &str,
        timeseries_id: &str,
    ) -> Result<serde_json::Value, MetadataError> {
        let response = self
            .client
            .get(format!("{}/timeseries/{}", self.base_url, timeseries_id))
            .send()
            .await
            .map_err(|e| MetadataError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MetadataError::ResolutionFailed {
                variable_id: variable_id.to_string(),
                reason: format!(
                    "timeseries {} lookup returned {}",
                    timeseries_id,
                    response.status()
                ),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MetadataError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    #[instrument(skip(self, spec), fields(variable_id = %spec.variable_id))]
    async fn resolve_variable(&self, spec: &VariableSpec) -> Result<Variable, MetadataError> {
        let mut resolved = None;

        if let Some(metadata) = &spec.metadata {
            resolved = Some(self.create_timeseries(&spec.variable_id, metadata).await?);
        } else if let Some(metadata_ids) = &spec.metadata_ids {
            resolved = Some(self.create_timeseries(&spec.variable_id, metadata_ids).await?);
        }

        if let Some(timeseries_id) = &spec.timeseries_id {
            resolved = Some(self.lookup_timeseries(&spec.variable_id, timeseries_id).await?);
        }

        let timeseries =
            resolved.ok_or_else(|| MetadataError::MissingSource(spec.variable_id.clone()))?;

        tracing::debug!(variable_id = %spec.variable_id, "Variable resolved");
        Ok(Variable {
            variable_id: spec.variable_id.clone(),
            timeseries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpMetadataClient {
        HttpMetadataClient::new(&MetadataConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
        })
        .expect("client should build")
    }

    #[tokio::test]
    async fn test_resolve_by_timeseries_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries/ts1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"timeseriesId": "ts1"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let variable = client
            .resolve_variable(&VariableSpec {
                variable_id: "v1".to_string(),
                metadata: None,
                metadata_ids: None,
                timeseries_id: Some("ts1".to_string()),
            })
            .await
            .expect("resolution should succeed");

        assert_eq!(variable.variable_id, "v1");
        assert_eq!(variable.timeseries["timeseriesId"], "ts1");
    }

    #[tokio::test]
    async fn test_resolve_by_metadata_posts_document() {
        let server = MockServer::start().await;
        let metadata = json!({"location": "station-7", "parameter": "precipitation"});
        Mock::given(method("POST"))
            .and(path("/timeseries"))
            .and(body_json(&metadata))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"timeseriesId": "ts-new"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let variable = client
            .resolve_variable(&VariableSpec {
                variable_id: "v1".to_string(),
                metadata: Some(metadata),
                metadata_ids: None,
                timeseries_id: None,
            })
            .await
            .expect("resolution should succeed");

        assert_eq!(variable.timeseries["timeseriesId"], "ts-new");
    }

    #[tokio::test]
    async fn test_timeseries_id_overrides_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/timeseries"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"timeseriesId": "created"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/timeseries/existing"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"timeseriesId": "existing"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let variable = client
            .resolve_variable(&VariableSpec {
                variable_id: "v1".to_string(),
                metadata: Some(json!({"location": "x"})),
                metadata_ids: None,
                timeseries_id: Some("existing".to_string()),
            })
            .await
            .expect("resolution should succeed");

        assert_eq!(variable.timeseries["timeseriesId"], "existing");
    }

    #[tokio::test]
    async fn test_missing_timeseries_fails_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .resolve_variable(&VariableSpec {
                variable_id: "v1".to_string(),
                metadata: None,
                metadata_ids: None,
                timeseries_id: Some("absent".to_string()),
            })
            .await;

        assert!(matches!(
            result,
            Err(MetadataError::ResolutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_spec_without_source_fails() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let result = client
            .resolve_variable(&VariableSpec {
                variable_id: "v1".to_string(),
                metadata: None,
                metadata_ids: None,
                timeseries_id: None,
            })
            .await;

        assert!(matches!(result, Err(MetadataError::MissingSource(_))));
    }
}
