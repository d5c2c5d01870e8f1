use axum::{extract::rejection::JsonRejection, http::StatusCode, Json};
use serde_json::Value;
use std::collections::HashMap;

use crate::database::{EntityKey, Record};
use crate::error::ApiError;
use crate::schema::EntitySpec;

/// Parent and child served by one nested listing route.
#[derive(Debug, Clone, Copy)]
pub struct NestedRoute {
    pub parent: &'static EntitySpec,
    pub child: &'static EntitySpec,
}

/// Unwraps a JSON body, turning axum's plain-text rejections into API errors.
pub fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(ApiError::payload_too_large("Request body too large"))
        }
        Err(rejection) => Err(ApiError::invalid_json(rejection.body_text())),
    }
}

pub fn entity_key(spec: &EntitySpec, params: &HashMap<String, String>) -> Result<EntityKey, ApiError> {
    Ok(EntityKey::from_params(spec, params)?)
}

/// Response form of one record.
pub fn output(spec: &EntitySpec, record: Record) -> Value {
    record.redacted(spec)
}

pub fn output_array(spec: &EntitySpec, records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(|r| r.redacted(spec)).collect())
}
