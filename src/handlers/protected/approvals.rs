use axum::extract::{Extension, Path, State};
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

/// GET /approvals - Pending accounts the caller may approve
pub async fn approvals_get(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Vec<Value>> {
    let pending = state.users.pending_for(auth_user.approver()).await?;
    Ok(ApiResponse::success(pending))
}

/// PUT /approvals/:id - Approve a pending account
pub async fn approvals_put(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> ApiResult<Value> {
    let user_id: i64 = user_id
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid user id: {}", user_id)))?;
    let approved = state.users.approve(auth_user.approver(), user_id).await?;
    Ok(ApiResponse::success(approved))
}
