use axum::extract::{Extension, Path, Query, State};
use serde_json::Value;
use std::collections::HashMap;

use crate::app::AppState;
use crate::database::EntityKey;
use crate::filter::Filter;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::ThroughRoute;

use super::utils::{output_array, NestedRoute};

/// GET /:parent/:id/:child - Visible children of a visible parent
pub async fn get(
    State(state): State<AppState>,
    Extension(route): Extension<NestedRoute>,
    Path(parent_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Value> {
    let key = EntityKey::from_params(route.parent, &HashMap::from([("id".to_string(), parent_id)]))?;
    let filter = Filter::from_params(route.child, &params, state.limits)?;
    let records = state.lifecycle.list_children(route.parent, &key, filter).await?;
    Ok(ApiResponse::success(output_array(route.child, records)))
}

/// GET /:parent/:id/:child - Children reached through an intermediate entity
pub async fn get_through(
    State(state): State<AppState>,
    Extension(route): Extension<ThroughRoute>,
    Path(parent_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Value> {
    let parent = route.parent.spec();
    let child = route.child.spec();
    let key = EntityKey::from_params(parent, &HashMap::from([("id".to_string(), parent_id)]))?;
    let filter = Filter::from_params(child, &params, state.limits)?;
    let records = state.lifecycle.list_through(&route, &key, filter).await?;
    Ok(ApiResponse::success(output_array(child, records)))
}
