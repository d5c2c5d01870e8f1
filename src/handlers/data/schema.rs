use axum::{
    extract::{rejection::JsonRejection, Extension, Query, State},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

use crate::app::AppState;
use crate::filter::Filter;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::EntitySpec;

use super::utils::{json_body, output, output_array};

/// GET /:collection - List visible records, filtered by query parameters
pub async fn get(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Value> {
    let filter = Filter::from_params(spec, &params, state.limits)?;
    let records = state.lifecycle.list(&filter).await?;
    Ok(ApiResponse::success(output_array(spec, records)))
}

/// POST /:collection - Create one record
pub async fn post(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let input = json_body(body)?;
    let created = state.lifecycle.create(spec, input).await?;
    Ok(ApiResponse::created(output(spec, created)))
}
