use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;
use crate::handlers::data::utils::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::LoginRequest;

/// POST /users - Register an account
///
/// Expected input: `{ "username", "password", "email", "role_id" }`. The
/// account starts inactive and pending approval unless it is the first
/// account and asks for the Admin role.
pub async fn register_post(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let input = json_body(body)?;
    let user = state.users.register(input).await?;
    Ok(ApiResponse::created(user))
}

/// POST /auth/login - Exchange credentials for a JWT
///
/// Returns `{ "token", "expires_in", "user" }`. Bad credentials are 401;
/// accounts pending approval or disabled are 403.
pub async fn login_post(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let input = json_body(body)?;
    let request: LoginRequest = serde_json::from_value(input)
        .map_err(|e| ApiError::bad_request(format!("Expected username and password: {}", e)))?;
    let session = state.users.login(request).await?;
    Ok(ApiResponse::success(session))
}
