use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use typerace_core::protocol::RoomStatus;
use typerace_core::{RaceError, ServerMessage};

use crate::room::{RoomContext, RoomHandle, spawn_room};

/// How many times a join chases a room that retired under it.
const JOIN_ATTEMPTS: usize = 3;

/// Process-wide map of live rooms. At most one room instance per id.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: DashMap<String, RoomHandle>,
    next_instance: AtomicU64,
    ctx: RoomContext,
}

impl RoomRegistry {
    pub fn new(ctx: RoomContext) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                next_instance: AtomicU64::new(1),
                ctx,
            }),
        }
    }

    /// Look up a room, creating it if absent. The entry lock makes
    /// concurrent callers for the same id share one instance.
    pub fn get_or_create(&self, room_id: &str, campaign_race: Option<u32>) -> RoomHandle {
        self.inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
                spawn_room(
                    room_id,
                    instance,
                    campaign_race,
                    self.inner.ctx.clone(),
                    self.clone(),
                )
            })
            .clone()
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.inner.rooms.get(room_id).map(|r| r.value().clone())
    }

    /// Unlist a room. Only the instance asking is removed, never a successor
    /// that took over the id.
    pub fn release(&self, room_id: &str, instance: u64) {
        if self
            .inner
            .rooms
            .remove_if(room_id, |_, handle| handle.instance == instance)
            .is_some()
        {
            debug!(%room_id, instance, "room released");
        }
    }

    /// Join a room, creating it on first join. Retries when the room it
    /// reached was retiring.
    pub async fn join(
        &self,
        room_id: &str,
        campaign_race: Option<u32>,
        player_id: &str,
        name: &str,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<RoomHandle, RaceError> {
        for _ in 0..JOIN_ATTEMPTS {
            let handle = self.get_or_create(room_id, campaign_race);
            match handle.join(player_id, name, tx.clone()).await {
                Ok(()) => return Ok(handle),
                Err(RaceError::RoomNotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(RaceError::RoomNotFound)
    }

    pub fn snapshot(&self) -> Vec<RoomStatus> {
        let mut rooms: Vec<RoomStatus> = self
            .inner
            .rooms
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    pub fn len(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rooms.is_empty()
    }
}
