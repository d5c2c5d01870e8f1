use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

use crate::app::AppState;
use crate::database::WriteMode;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::EntitySpec;

use super::utils::{entity_key, json_body, output};

/// GET /:collection/:id - Read one visible record
pub async fn get(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult<Value> {
    let key = entity_key(spec, &params)?;
    let record = state.lifecycle.read(spec, &key).await?;
    Ok(ApiResponse::success(output(spec, record)))
}

/// PUT /:collection/:id - Replace every mutable field
pub async fn put(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let key = entity_key(spec, &params)?;
    let input = json_body(body)?;
    let record = state.lifecycle.update(spec, &key, input, WriteMode::Replace).await?;
    Ok(ApiResponse::success(output(spec, record)))
}

/// PATCH /:collection/:id - Change only the supplied fields
pub async fn patch(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let key = entity_key(spec, &params)?;
    let input = json_body(body)?;
    let record = state.lifecycle.update(spec, &key, input, WriteMode::Merge).await?;
    Ok(ApiResponse::success(output(spec, record)))
}

/// DELETE /:collection/:id - Disable (soft delete) a record
pub async fn delete(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult<Value> {
    let key = entity_key(spec, &params)?;
    let record = state.lifecycle.disable(spec, &key).await?;
    Ok(ApiResponse::success(output(spec, record)))
}

/// PATCH /:collection/:id/activar - Reactivate a disabled record
pub async fn activate(
    State(state): State<AppState>,
    Extension(spec): Extension<&'static EntitySpec>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult<Value> {
    let key = entity_key(spec, &params)?;
    let record = state.lifecycle.enable(spec, &key).await?;
    Ok(ApiResponse::success(output(spec, record)))
}
