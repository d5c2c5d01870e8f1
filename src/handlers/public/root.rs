use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Map, Value};

use crate::app::AppState;
use crate::schema::registry;

/// GET / - API description and endpoint list
pub async fn root() -> Json<Value> {
    let mut collections = Map::new();
    for spec in registry::routed() {
        collections.insert(
            spec.collection.to_string(),
            json!(format!("/{}[{}] (disable: DELETE, reactivate: PATCH .../activar)", spec.collection, spec.key_path())),
        );
    }

    Json(json!({
        "name": "SkillLink API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Tutoring platform administration API with soft-delete lifecycle",
        "endpoints": {
            "home": "/ (public)",
            "health": "/health (public)",
            "collections": collections,
            "nested": "/:parent/:id/:child (public)",
            "through": registry::THROUGH_ROUTES
                .iter()
                .map(|r| format!("/{}/:id/{} (via {})", r.parent.spec().collection, r.child.spec().collection, r.via))
                .collect::<Vec<_>>(),
            "stats": "/stats/:collection, /:collection/:id/stats (public)",
            "ranges": "?<column>[gte]=...&<column>[lte]=... on declared range columns",
            "users": "/users (public registration)",
            "login": "/auth/login (public - token acquisition)",
            "approvals": "/approvals[/:id] (protected)",
        }
    }))
}

/// GET /health - Store connectivity
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "timestamp": now,
                "store": state.store.backend(),
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "timestamp": now,
                    "store": state.store.backend(),
                    "error": "store unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                })),
            )
        }
    }
}
