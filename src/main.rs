use std::sync::Arc;

use skilllink_api::app::{app, AppState};
use skilllink_api::config::{self, StoreBackend};
use skilllink_api::database::{DatabaseManager, MemoryStore, PgStore, Store};
use skilllink_api::schema::DependencyGraph;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SKILLLINK_STORE, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skilllink_api=info,tower_http=info".into()),
        )
        .init();

    let config = config::config();
    tracing::info!("Starting SkillLink API in {:?} mode", config.environment);
    if skilllink_api::is_production!() && config.security.jwt_secret.is_empty() {
        tracing::warn!("JWT_SECRET is not set; login and approvals will fail");
    }

    // Refuse to start on a dangling or cyclic registry
    let graph = Arc::new(DependencyGraph::from_registry()?);

    let store: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let pool = DatabaseManager::connect(&config.database).await?;
            if config.database.run_migrations {
                DatabaseManager::migrate(&pool).await?;
            }
            Arc::new(PgStore::new(pool, config.database.enable_query_logging))
        }
    };

    let state = AppState::new(store, graph, config);
    let app = app(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("SkillLink API listening on http://{}", bind_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
