use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::warn;

use typerace_core::protocol::{RaceLogEntry, RoomStatus};

use crate::db;
use crate::state::AppState;
use crate::ws;

const DEFAULT_RECENT: i64 = 20;
const MAX_RECENT: i64 = 100;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Rooms ───────────────────────────────────────────────────────────────

pub async fn rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomStatus>> {
    Json(state.registry.snapshot())
}

// ── Race log ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

pub async fn recent_races(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<RaceLogEntry>>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);
    let races = db::recent_races(&state.db, limit).await.map_err(|err| {
        warn!(%err, "failed to read race log");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(races))
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub player_id: String,
    pub name: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let player_id = query.player_id.trim().to_string();
    if player_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if state.connections.contains_key(&player_id) {
        return Err(StatusCode::CONFLICT);
    }

    let current = state.connection_count.load(Ordering::Relaxed);
    if current >= state.config.max_connections {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let name = query
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| player_id.clone());

    Ok(ws.on_upgrade(move |socket| ws::handle_socket(state, socket, player_id, name)))
}
