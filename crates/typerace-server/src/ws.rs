use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};

use typerace_core::protocol::ErrorCode;
use typerace_core::{ClientMessage, RaceError, ServerMessage};

use crate::room::RoomHandle;
use crate::state::{AppState, ConnectionHandle};

/// Top-level WebSocket handler -- spawned per connection.
pub async fn handle_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    player_id: String,
    name: String,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // The upgrade route already turned away duplicates; this closes the
    // window between that check and here.
    let registered = match state.connections.entry(player_id.clone()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(ConnectionHandle {
                tx: tx.clone(),
                room_id: None,
                message_count: 0,
                rate_limit_window: Instant::now(),
            });
            true
        }
    };
    if !registered {
        debug!(%player_id, "duplicate connection closed");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    state.connection_count.fetch_add(1, Ordering::Relaxed);
    info!(%player_id, %name, "player connected");

    let max_per_sec = state.config.max_messages_per_sec;

    loop {
        tokio::select! {
            // Outbound: forward queued ServerMessage to the WebSocket.
            Some(msg) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        if !within_rate_limit(&state, &player_id, max_per_sec) {
                            continue;
                        }

                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                let message = format!("invalid message: {}", e);
                                send_error(&tx, ErrorCode::InvalidMessage, message);
                                continue;
                            }
                        };

                        handle_message(&state, &player_id, &name, &tx, client_msg).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    // Tell the room before freeing the player id, so a reconnect always
    // queues behind this disconnect.
    if let Ok(room) = current_room(&state, &player_id) {
        room.disconnect(&player_id);
    }
    state.connections.remove(&player_id);
    state.connection_count.fetch_sub(1, Ordering::Relaxed);
    info!(%player_id, "player disconnected");
}

/// Count a message against the connection's one-second window, telling the
/// client when it is over.
fn within_rate_limit(state: &AppState, player_id: &str, max_per_sec: u32) -> bool {
    let Some(mut conn) = state.connections.get_mut(player_id) else {
        return false;
    };
    let now = Instant::now();
    if now.duration_since(conn.rate_limit_window) > Duration::from_secs(1) {
        conn.rate_limit_window = now;
        conn.message_count = 0;
    }
    conn.message_count += 1;
    if conn.message_count > max_per_sec {
        send_error(&conn.tx, ErrorCode::RateLimited, "rate limited".into());
        return false;
    }
    true
}

/// Dispatch a single client message.
async fn handle_message(
    state: &Arc<AppState>,
    player_id: &str,
    name: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    let result = match msg {
        ClientMessage::Join {
            room_id,
            campaign_race,
        } => join(state, player_id, name, tx, &room_id, campaign_race).await,
        ClientMessage::SetReady { is_ready } => match current_room(state, player_id) {
            Ok(room) => room.set_ready(player_id, is_ready).await,
            Err(err) => Err(err),
        },
        ClientMessage::StartRace => match current_room(state, player_id) {
            Ok(room) => room.start(player_id).await,
            Err(err) => Err(err),
        },
        ClientMessage::Progress {
            progress,
            wpm,
            accuracy,
        } => match current_room(state, player_id) {
            Ok(room) => room.progress(player_id, progress, wpm, accuracy).await,
            Err(err) => Err(err),
        },
        ClientMessage::Finish { wpm, accuracy } => match current_room(state, player_id) {
            Ok(room) => room.finish(player_id, wpm, accuracy).await,
            Err(err) => Err(err),
        },
        ClientMessage::Leave => leave(state, player_id).await,
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
            Ok(())
        }
    };

    if let Err(err) = result {
        if !err.is_silent() {
            send_error(tx, err.code(), err.to_string());
        }
    }
}

async fn join(
    state: &AppState,
    player_id: &str,
    name: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    room_id: &str,
    campaign_race: Option<u32>,
) -> Result<(), RaceError> {
    let previous = state
        .connections
        .get(player_id)
        .and_then(|c| c.room_id.clone());
    if let Some(previous) = previous.filter(|prev| prev != room_id) {
        if let Some(room) = state.registry.get(&previous) {
            // Already gone from the old room is fine.
            let _ = room.leave(player_id).await;
        }
        set_room(state, player_id, None);
    }

    state
        .registry
        .join(room_id, campaign_race, player_id, name, tx.clone())
        .await?;
    set_room(state, player_id, Some(room_id.to_string()));
    Ok(())
}

async fn leave(state: &AppState, player_id: &str) -> Result<(), RaceError> {
    let room = current_room(state, player_id)?;
    let result = room.leave(player_id).await;
    set_room(state, player_id, None);
    result
}

/// Live room this connection last joined.
fn current_room(state: &AppState, player_id: &str) -> Result<RoomHandle, RaceError> {
    let room_id = state
        .connections
        .get(player_id)
        .and_then(|c| c.room_id.clone())
        .ok_or(RaceError::NotInRoom)?;
    state.registry.get(&room_id).ok_or(RaceError::RoomNotFound)
}

fn set_room(state: &AppState, player_id: &str, room_id: Option<String>) {
    if let Some(mut conn) = state.connections.get_mut(player_id) {
        conn.room_id = room_id;
    }
}

fn send_error(tx: &mpsc::UnboundedSender<ServerMessage>, code: ErrorCode, message: String) {
    let _ = tx.send(ServerMessage::Error { code, message });
}
