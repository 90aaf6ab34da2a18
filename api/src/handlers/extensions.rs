use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{CreateExtension, Extension, ExtensionSummary, TriggerGroup};

/// Register a new extension
///
/// Validates the document, resolves every variable through the metadata
/// service, persists the extension and trigger rows atomically, and fans
/// out to the caches and the dispatch queue.
#[tracing::instrument(skip(state, request), fields(extension_id = %request.extension_id))]
pub async fn create_extension(
    State(state): State<AppState>,
    Json(request): Json<CreateExtension>,
) -> Result<Json<SuccessResponse<Extension>>, ErrorResponse> {
    let extension = state.service.create(request).await?;

    tracing::info!(extension_id = %extension.extension_id, "Extension created");
    Ok(Json(SuccessResponse::new(extension)))
}

/// Get an assembled extension by id
#[tracing::instrument(skip(state))]
pub async fn get_extension(
    State(state): State<AppState>,
    Path(extension_id): Path<String>,
) -> Result<Json<SuccessResponse<Extension>>, ErrorResponse> {
    let extension = state.service.get(&extension_id).await?;
    Ok(Json(SuccessResponse::new(extension)))
}

/// Delete an extension. Idempotent: the id is echoed back whether or not
/// a record existed.
#[tracing::instrument(skip(state))]
pub async fn delete_extension(
    State(state): State<AppState>,
    Path(extension_id): Path<String>,
) -> Result<Json<SuccessResponse<String>>, ErrorResponse> {
    let extension_id = state.service.delete(&extension_id).await?;

    tracing::info!(extension_id = %extension_id, "Extension deleted");
    Ok(Json(SuccessResponse::new(extension_id)))
}

/// Query parameters for the OnChange trigger listing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChangeQuery {
    pub timeseries_id: String,
}

/// Every extension registered OnChange for a timeseries
#[tracing::instrument(skip(state), fields(timeseries_id = %query.timeseries_id))]
pub async fn list_on_change_extensions(
    State(state): State<AppState>,
    Query(query): Query<OnChangeQuery>,
) -> Result<Json<SuccessResponse<Vec<ExtensionSummary>>>, ErrorResponse> {
    let extensions = state
        .service
        .extensions_for_timeseries(&query.timeseries_id)
        .await?;
    Ok(Json(SuccessResponse::new(extensions)))
}

/// All OnTime schedule targets grouped with their extensions, for
/// scheduler bootstrap and resync
#[tracing::instrument(skip(state))]
pub async fn list_on_time_extensions(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<TriggerGroup>>>, ErrorResponse> {
    let groups = state.service.on_time_schedule().await?;
    Ok(Json(SuccessResponse::new(groups)))
}
