use std::sync::atomic::AtomicU32;
use std::time::Instant;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use typerace_core::{PlayerId, ServerMessage};

use crate::config::ServerConfig;
use crate::registry::RoomRegistry;

/// Handle to push messages to a connected WebSocket client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    /// Room the player last joined through this connection.
    pub room_id: Option<String>,
    /// Messages received in the current second window.
    pub message_count: u32,
    pub rate_limit_window: Instant,
}

/// Shared application state.
pub struct AppState {
    pub db: SqlitePool,
    pub config: ServerConfig,
    pub registry: RoomRegistry,
    pub connections: DashMap<PlayerId, ConnectionHandle>,
    pub connection_count: AtomicU32,
}
