use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Uri},
    middleware,
    routing::{get, patch, post, put},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AppConfig, SecurityConfig};
use crate::database::Store;
use crate::error::ApiError;
use crate::filter::ListLimits;
use crate::handlers::{data, protected, public};
use crate::lifecycle::LifecycleManager;
use crate::middleware::jwt_auth_middleware;
use crate::schema::{registry, DependencyGraph};
use crate::services::UserService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub users: Arc<UserService>,
    pub store: Arc<dyn Store>,
    pub security: Arc<SecurityConfig>,
    pub limits: ListLimits,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, graph: Arc<DependencyGraph>, config: &AppConfig) -> Self {
        Self {
            lifecycle: Arc::new(LifecycleManager::new(store.clone(), graph)),
            users: Arc::new(UserService::new(store.clone(), config.security.clone())),
            store,
            security: Arc::new(config.security.clone()),
            limits: ListLimits::from(&config.api),
        }
    }
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(auth_public_routes())
        // Entity lifecycle
        .merge(data_routes())
        .merge(nested_routes(state.lifecycle.graph()))
        .merge(through_routes())
        .route("/stats/:collection", get(data::stats_get))
        // Protected
        .merge(protected_routes(state.clone()))
        .fallback(not_found)
        // Global middleware
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .layer(cors_layer(&config.security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(public::register_post))
        .route("/auth/login", post(public::login_post))
}

fn data_routes() -> Router<AppState> {
    let mut router = Router::new();
    for spec in registry::routed() {
        let collection = format!("/{}", spec.collection);
        let record = format!("{}{}", collection, spec.key_path());

        let mut entity = Router::new()
            // Collection operations
            .route(&collection, get(data::schema_get).post(data::schema_post))
            // Record operations
            .route(
                &record,
                get(data::record_get)
                    .put(data::record_put)
                    .patch(data::record_patch)
                    .delete(data::record_delete),
            )
            // Reactivation
            .route(&format!("{}/activar", record), patch(data::record_activate));
        if spec.has_surrogate_key() {
            entity = entity.route(&format!("{}/stats", record), get(data::record_stats_get));
        }
        router = router.merge(entity.layer(Extension(spec)));
    }
    router
}

/// `/parent/:id/child` for every relation whose parent has a single-column key.
fn nested_routes(graph: &DependencyGraph) -> Router<AppState> {
    let mut router = Router::new();
    for kind in graph.kinds() {
        let parent = kind.spec();
        if !parent.routed || !parent.has_surrogate_key() {
            continue;
        }
        for relation in graph.children(kind) {
            let child = relation.child.spec();
            if !child.routed {
                continue;
            }
            let path = format!("/{}/:id/{}", parent.collection, child.collection);
            let route = Router::new()
                .route(&path, get(data::nested_get))
                .layer(Extension(data::NestedRoute { parent, child }));
            router = router.merge(route);
        }
    }
    router
}

/// `/parent/:id/child` for children reached through an intermediate entity.
fn through_routes() -> Router<AppState> {
    let mut router = Router::new();
    for route in registry::THROUGH_ROUTES {
        let path = format!("/{}/:id/{}", route.parent.spec().collection, route.child.spec().collection);
        router = router.merge(
            Router::new()
                .route(&path, get(data::through_get))
                .layer(Extension(*route)),
        );
    }
    router
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/approvals", get(protected::approvals_get))
        .route("/approvals/:id", put(protected::approvals_put))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = AppConfig::development();
        let graph = Arc::new(DependencyGraph::from_registry().unwrap());
        let state = AppState::new(Arc::new(MemoryStore::new()), graph, &config);
        app(state, &config)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");

        let (status, body) = send(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["endpoints"]["collections"]["sessions"].is_string());
    }

    #[tokio::test]
    async fn test_disable_blocked_then_allowed() {
        let app = test_app();
        let (status, inst) = send(&app, Method::POST, "/institutions", Some(json!({"name": "North"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(inst["id"], 1);
        assert_eq!(inst["active"], true);

        let (status, _) = send(&app, Method::POST, "/classrooms", Some(json!({"institution_id": 1}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, Method::DELETE, "/institutions/1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "blocking-children: Classroom");
        assert_eq!(body["code"], "CONFLICT");

        let (status, children) = send(&app, Method::GET, "/institutions/1/classrooms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(children.as_array().map(Vec::len), Some(1));

        let (status, _) = send(&app, Method::DELETE, "/classrooms/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::DELETE, "/institutions/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);

        let (status, _) = send(&app, Method::GET, "/institutions/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::PATCH, "/classrooms/1/activar", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "inactive-parent: Institution");

        let (status, _) = send(&app, Method::PATCH, "/institutions/1/activar", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::PATCH, "/classrooms/1/activar", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], true);
    }

    #[tokio::test]
    async fn test_request_errors_use_json_envelope() {
        let app = test_app();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/institutions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "INVALID_JSON");

        let (status, body) = send(&app, Method::POST, "/institutions", Some(json!({"address": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "name");

        let (status, body) = send(&app, Method::GET, "/institutions?salary=1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "unknown-field");

        let (status, body) = send(&app, Method::GET, "/institutions/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "malformed-key");

        let (status, body) = send(&app, Method::GET, "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _) = send(&app, Method::GET, "/stats/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_room_assignment_composite_key() {
        let app = test_app();
        send(&app, Method::POST, "/institutions", Some(json!({"name": "North"}))).await;
        send(
            &app,
            Method::POST,
            "/tutors",
            Some(json!({"first_name": "Ana", "last_name": "Ruiz", "email": "ana@example.com"})),
        )
        .await;
        send(&app, Method::POST, "/classrooms", Some(json!({"institution_id": 1}))).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/sessions",
            Some(json!({"name": "Algebra", "capacity": 5, "tutor_id": 1, "institution_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, assignment) = send(
            &app,
            Method::POST,
            "/room_assignments",
            Some(json!({"classroom_id": 1, "session_id": 1, "tutor_id": 1, "starts_at": "09:00", "weekday": "Monday"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(assignment["starts_at"], "09:00:00");

        let (status, body) = send(&app, Method::GET, "/room_assignments/1/1/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["weekday"], "Monday");

        let (status, body) = send(&app, Method::DELETE, "/tutors/1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "blocking-children: TutoringSession");
    }

    #[tokio::test]
    async fn test_approvals_require_token() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/approvals", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_stats() {
        let app = test_app();
        send(&app, Method::POST, "/institutions", Some(json!({"name": "North"}))).await;
        for capacity in [10, 30] {
            send(&app, Method::POST, "/classrooms", Some(json!({"institution_id": 1, "capacity": capacity}))).await;
        }
        let (status, body) = send(&app, Method::GET, "/stats/classrooms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["capacity"]["avg"], 20.0);
    }

    async fn seed_payments(app: &Router) {
        send(app, Method::POST, "/institutions", Some(json!({"name": "North"}))).await;
        send(
            app,
            Method::POST,
            "/tutors",
            Some(json!({"first_name": "Ana", "last_name": "Ruiz", "email": "ana@example.com"})),
        )
        .await;
        send(
            app,
            Method::POST,
            "/sessions",
            Some(json!({"name": "Algebra", "capacity": 5, "tutor_id": 1, "institution_id": 1})),
        )
        .await;
        send(
            app,
            Method::POST,
            "/students",
            Some(json!({"first_name": "Luis", "last_name": "Mora", "email": "luis@example.com"})),
        )
        .await;
        send(app, Method::POST, "/enrollments", Some(json!({"student_id": 1, "session_id": 1}))).await;
        for (amount, paid_at) in [(100, "2024-03-02T12:00:00Z"), (50, "2024-04-01T08:00:00Z")] {
            let (status, _) = send(
                app,
                Method::POST,
                "/payments",
                Some(json!({"enrollment_id": 1, "amount": amount, "paid_at": paid_at})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn test_put_keeps_generated_payment_fields() {
        let app = test_app();
        seed_payments(&app).await;
        let (_, before) = send(&app, Method::GET, "/payments/1", None).await;

        let (status, after) = send(&app, Method::PUT, "/payments/1", Some(json!({"amount": 5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(after["amount"], 5);
        assert_eq!(after["qr_code"], before["qr_code"]);
        assert_eq!(after["paid_at"], before["paid_at"]);

        let (status, body) = send(&app, Method::PATCH, "/payments/1", Some(json!({"paid_at": null}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "paid_at");
        assert_eq!(body["detail"], "invalid-value");
    }

    #[tokio::test]
    async fn test_payment_ranges_and_student_payments() {
        let app = test_app();
        seed_payments(&app).await;

        let (status, body) =
            send(&app, Method::GET, "/payments?paid_at%5Bgte%5D=2024-03-01&paid_at%5Blte%5D=2024-03-31", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["amount"], 100);

        let (status, body) = send(&app, Method::GET, "/students/1/payments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["amount"], 50);
        assert_eq!(body[1]["amount"], 100);

        let (status, _) = send(&app, Method::GET, "/students/9/payments", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::GET, "/stats/payments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["distinct_enrollment_id"], 1);
        assert_eq!(body["amount"]["sum"], 150.0);
    }

    #[tokio::test]
    async fn test_record_stats_route() {
        let app = test_app();
        seed_payments(&app).await;
        let (status, body) = send(&app, Method::GET, "/tutors/1/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity"], "Tutor");
        assert_eq!(body["children"]["TutoringSession"]["active"], 1);
        assert_eq!(body["children"]["TutoringSession"]["capacity"]["sum"], 5.0);
        assert_eq!(body["children"]["Activity"]["active"], 0);

        let (status, _) = send(&app, Method::GET, "/tutors/7/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
