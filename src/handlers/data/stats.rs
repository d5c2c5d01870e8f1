use axum::extract::{Extension, Path, State};
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::lifecycle::{RecordStats, Summary};
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::{registry, EntitySpec};

use super::utils::entity_key;

/// GET /stats/:collection - Aggregates over the visible rows of a collection
pub async fn get(State(state): State<AppState>, Path(collection): Path<String>) -> ApiResult<Summary> {
    let spec = registry::by_collection(&collection)
        .filter(|spec| spec.routed)
        .ok_or_else(|| ApiError::not_found(format!("Unknown collection: {}", collection)))?;
    let summary = state.lifecycle.summary(spec).await?;
    Ok(ApiResponse::success(summary))
}

/// GET /:collection/:id/stats - Aggregates over each child entity of one visible record
pub async fn record_get(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult<RecordStats> {
    let key = entity_key(spec, &params)?;
    let stats = state.lifecycle.record_stats(spec, &key).await?;
    Ok(ApiResponse::success(stats))
}
