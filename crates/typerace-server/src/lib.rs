pub mod config;
pub mod countdown;
pub mod db;
pub mod listeners;
pub mod registry;
pub mod room;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use axum::Router;
use axum::routing::get;
use dashmap::DashMap;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::registry::RoomRegistry;
use crate::room::RoomContext;
use crate::state::AppState;

/// Summaries buffered per listener before it starts lagging.
const RESULTS_CAPACITY: usize = 64;

/// Build a fully configured Router + shared state.
pub async fn build_app(config: ServerConfig) -> Result<(Router, Arc<AppState>), sqlx::Error> {
    // A second connection to an in-memory database would be a different database.
    let max_db_connections = if config.database_url.contains(":memory:") {
        1
    } else {
        5
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_db_connections)
        .connect(&config.database_url)
        .await?;

    db::init_db(&pool).await?;

    let (results_tx, _) = broadcast::channel(RESULTS_CAPACITY);
    listeners::spawn_listeners(&results_tx, pool.clone(), config.webhook_url.clone());

    let registry = RoomRegistry::new(RoomContext {
        config: config.room.clone(),
        prompts: Arc::new(config.prompts.clone()),
        results_tx,
    });

    let state = Arc::new(AppState {
        db: pool,
        config,
        registry,
        connections: DashMap::new(),
        connection_count: AtomicU32::new(0),
    });

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rooms", get(routes::rooms))
        .route("/races/recent", get(routes::recent_races))
        .route("/ws", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    Ok((app, state))
}
