//! One task per race room.
//!
//! The actor owns the [`RaceRoom`] and the members' outbound channels and
//! applies commands one at a time from its queue, so finishing order and
//! phase transitions never race. Timers only ever post commands back into
//! the queue, tagged with the race number they were armed for.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use typerace_core::protocol::{RaceSummary, RoomStatus};
use typerace_core::{PlayerId, PromptPool, RacePhase, RaceError, RaceRoom, ServerMessage};

use crate::config::RoomConfig;
use crate::countdown::{Countdown, ScheduledTask};
use crate::registry::RoomRegistry;

pub type Reply = oneshot::Sender<Result<(), RaceError>>;

/// Commands consumed by a room actor.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        player_id: PlayerId,
        name: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
        reply: Reply,
    },
    SetReady {
        player_id: PlayerId,
        is_ready: bool,
        reply: Reply,
    },
    Start {
        player_id: PlayerId,
        reply: Reply,
    },
    Progress {
        player_id: PlayerId,
        progress: f64,
        wpm: u32,
        accuracy: f64,
        reply: Reply,
    },
    Finish {
        player_id: PlayerId,
        wpm: u32,
        accuracy: f64,
        reply: Reply,
    },
    Leave {
        player_id: PlayerId,
        reply: Reply,
    },
    Disconnect {
        player_id: PlayerId,
    },
    CountdownTick {
        race_number: u64,
        remaining: u32,
    },
    CountdownGo {
        race_number: u64,
    },
    RaceTimeout {
        race_number: u64,
    },
    Settle {
        race_number: u64,
    },
    GraceExpired {
        player_id: PlayerId,
    },
}

impl RoomCommand {
    /// Answer a command the room will never process.
    fn reject(self, err: RaceError) {
        let reply = match self {
            RoomCommand::Join { reply, .. }
            | RoomCommand::SetReady { reply, .. }
            | RoomCommand::Start { reply, .. }
            | RoomCommand::Progress { reply, .. }
            | RoomCommand::Finish { reply, .. }
            | RoomCommand::Leave { reply, .. } => reply,
            _ => return,
        };
        let _ = reply.send(Err(err));
    }
}

/// Cloneable address of a live room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub room_id: String,
    pub instance: u64,
    tx: mpsc::UnboundedSender<RoomCommand>,
    status: watch::Receiver<RoomStatus>,
}

impl RoomHandle {
    pub fn status(&self) -> RoomStatus {
        self.status.borrow().clone()
    }

    async fn request<F>(&self, make: F) -> Result<(), RaceError>
    where
        F: FnOnce(Reply) -> RoomCommand,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| RaceError::RoomNotFound)?;
        rx.await.unwrap_or(Err(RaceError::RoomNotFound))
    }

    pub async fn join(
        &self,
        player_id: &str,
        name: &str,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Join {
            player_id: player_id.to_string(),
            name: name.to_string(),
            tx,
            reply,
        })
        .await
    }

    pub async fn set_ready(&self, player_id: &str, is_ready: bool) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::SetReady {
            player_id: player_id.to_string(),
            is_ready,
            reply,
        })
        .await
    }

    pub async fn start(&self, player_id: &str) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Start {
            player_id: player_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn progress(
        &self,
        player_id: &str,
        progress: f64,
        wpm: u32,
        accuracy: f64,
    ) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Progress {
            player_id: player_id.to_string(),
            progress,
            wpm,
            accuracy,
            reply,
        })
        .await
    }

    pub async fn finish(&self, player_id: &str, wpm: u32, accuracy: f64) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Finish {
            player_id: player_id.to_string(),
            wpm,
            accuracy,
            reply,
        })
        .await
    }

    pub async fn leave(&self, player_id: &str) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Leave {
            player_id: player_id.to_string(),
            reply,
        })
        .await
    }

    /// Fire-and-forget: the connection is already gone.
    pub fn disconnect(&self, player_id: &str) {
        let _ = self.tx.send(RoomCommand::Disconnect {
            player_id: player_id.to_string(),
        });
    }
}

/// Shared pieces every room actor needs.
#[derive(Clone)]
pub struct RoomContext {
    pub config: RoomConfig,
    pub prompts: Arc<PromptPool>,
    pub results_tx: broadcast::Sender<Arc<RaceSummary>>,
}

/// Spawn the actor for a fresh room and return its handle.
pub fn spawn_room(
    room_id: &str,
    instance: u64,
    campaign_race: Option<u32>,
    ctx: RoomContext,
    registry: RoomRegistry,
) -> RoomHandle {
    let room = RaceRoom::new(room_id, ctx.config.rules.clone(), campaign_race);
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status) = watch::channel(status_of(&room));

    let actor = RoomActor {
        room,
        instance,
        ctx,
        self_tx: tx.clone(),
        status_tx,
        peers: HashMap::new(),
        countdown: None,
        race_timer: None,
        settle_timer: None,
        grace_timers: HashMap::new(),
    };
    let listing = Listing {
        registry,
        room_id: room_id.to_string(),
        instance,
    };
    tokio::spawn(actor.run(rx, listing));

    RoomHandle {
        room_id: room_id.to_string(),
        instance,
        tx,
        status,
    }
}

fn status_of(room: &RaceRoom) -> RoomStatus {
    RoomStatus {
        room_id: room.room_id().to_string(),
        phase: room.phase(),
        members: room.member_count(),
        race_number: room.race_number(),
    }
}

/// Room clock. Follows tokio time so paused-time tests stay deterministic.
fn room_clock() -> std::time::Instant {
    Instant::now().into_std()
}

/// Keeps a room instance listed in the registry. Dropping it unlists the
/// instance, including when the actor task unwinds.
struct Listing {
    registry: RoomRegistry,
    room_id: String,
    instance: u64,
}

impl Drop for Listing {
    fn drop(&mut self) {
        self.registry.release(&self.room_id, self.instance);
    }
}

struct RoomActor {
    room: RaceRoom,
    instance: u64,
    ctx: RoomContext,
    self_tx: mpsc::UnboundedSender<RoomCommand>,
    status_tx: watch::Sender<RoomStatus>,
    /// Outbound channels of connected players.
    peers: HashMap<PlayerId, mpsc::UnboundedSender<ServerMessage>>,
    countdown: Option<Countdown>,
    race_timer: Option<ScheduledTask>,
    settle_timer: Option<ScheduledTask>,
    grace_timers: HashMap<PlayerId, ScheduledTask>,
}

impl RoomActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>, listing: Listing) {
        let room_id = self.room.room_id().to_string();
        info!(%room_id, instance = self.instance, "room opened");

        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
            self.sync_timers();
            self.status_tx.send_replace(status_of(&self.room));

            if self.room.is_empty()
                && matches!(self.room.phase(), RacePhase::Waiting | RacePhase::Finished)
            {
                break;
            }
        }

        // Unlist first so new joins create a fresh room, then turn away
        // anything that reached this instance in the meantime.
        drop(listing);
        rx.close();
        while let Some(cmd) = rx.recv().await {
            cmd.reject(RaceError::RoomNotFound);
        }
        info!(%room_id, instance = self.instance, "room closed");
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                player_id,
                name,
                tx,
                reply,
            } => match self.room.join(&player_id, &name) {
                Ok(events) => {
                    self.grace_timers.remove(&player_id);
                    self.peers.insert(player_id.clone(), tx.clone());
                    let _ = reply.send(Ok(()));
                    info!(room_id = self.room.room_id(), %player_id, "player joined");
                    self.broadcast(events);
                    for event in self.room.resume_events() {
                        let _ = tx.send(event);
                    }
                }
                Err(err) => self.reject(&player_id, reply, err),
            },
            RoomCommand::SetReady {
                player_id,
                is_ready,
                reply,
            } => {
                let result = self.room.set_ready(&player_id, is_ready);
                self.respond(&player_id, reply, result);
            }
            RoomCommand::Start { player_id, reply } => {
                let result = self.room.start(&player_id);
                if result.is_ok() {
                    info!(
                        room_id = self.room.room_id(),
                        race_number = self.room.race_number(),
                        %player_id,
                        "countdown started"
                    );
                }
                self.respond(&player_id, reply, result);
            }
            RoomCommand::Progress {
                player_id,
                progress,
                wpm,
                accuracy,
                reply,
            } => {
                let result = self.room.record_progress(&player_id, progress, wpm, accuracy);
                self.respond(&player_id, reply, result);
            }
            RoomCommand::Finish {
                player_id,
                wpm,
                accuracy,
                reply,
            } => {
                let result = self.room.finish(&player_id, wpm, accuracy, room_clock());
                self.respond(&player_id, reply, result);
            }
            RoomCommand::Leave { player_id, reply } => {
                self.peers.remove(&player_id);
                self.grace_timers.remove(&player_id);
                let result = self.room.leave(&player_id);
                if result.is_ok() {
                    info!(room_id = self.room.room_id(), %player_id, "player left");
                }
                self.respond(&player_id, reply, result);
            }
            RoomCommand::Disconnect { player_id } => {
                let events = self.drop_peer(&player_id);
                self.broadcast(events);
            }
            RoomCommand::CountdownTick {
                race_number,
                remaining,
            } => {
                if race_number == self.room.race_number() {
                    let events = self.room.countdown_tick(remaining);
                    self.broadcast(events);
                }
            }
            RoomCommand::CountdownGo { race_number } => {
                if race_number == self.room.race_number()
                    && self.room.phase() == RacePhase::Countdown
                {
                    let prompt = self.ctx.prompts.pick();
                    let events = self.room.begin_race(prompt, room_clock());
                    info!(room_id = self.room.room_id(), race_number, "race started");
                    self.broadcast(events);
                }
            }
            RoomCommand::RaceTimeout { race_number } => {
                if race_number == self.room.race_number() {
                    let events = self.room.expire();
                    if !events.is_empty() {
                        info!(room_id = self.room.room_id(), race_number, "race timed out");
                    }
                    self.broadcast(events);
                }
            }
            RoomCommand::Settle { race_number } => {
                if race_number == self.room.race_number() {
                    let events = self.room.reset();
                    self.broadcast(events);
                }
            }
            RoomCommand::GraceExpired { player_id } => {
                self.grace_timers.remove(&player_id);
                if self.room.contains(&player_id) && !self.room.is_connected(&player_id) {
                    info!(room_id = self.room.room_id(), %player_id, "reconnect grace expired");
                    let events = self.room.leave(&player_id).unwrap_or_default();
                    self.broadcast(events);
                }
            }
        }
    }

    fn respond(
        &mut self,
        player_id: &str,
        reply: Reply,
        result: Result<Vec<ServerMessage>, RaceError>,
    ) {
        match result {
            Ok(events) => {
                let _ = reply.send(Ok(()));
                self.broadcast(events);
            }
            Err(err) => self.reject(player_id, reply, err),
        }
    }

    fn reject(&self, player_id: &str, reply: Reply, err: RaceError) {
        debug!(room_id = self.room.room_id(), %player_id, %err, "command rejected");
        let _ = reply.send(Err(err));
    }

    /// Stop sending to a player. With a grace period the seat is held until
    /// the timer fires; otherwise the player leaves.
    fn drop_peer(&mut self, player_id: &str) -> Vec<ServerMessage> {
        self.peers.remove(player_id);
        if !self.room.contains(player_id) {
            return Vec::new();
        }
        match self.ctx.config.disconnect_grace {
            Some(grace) => {
                let tx = self.self_tx.clone();
                let id = player_id.to_string();
                self.grace_timers.insert(
                    player_id.to_string(),
                    ScheduledTask::after(grace, move || {
                        let _ = tx.send(RoomCommand::GraceExpired { player_id: id });
                    }),
                );
                self.room.mark_disconnected(player_id)
            }
            None => self.room.leave(player_id).unwrap_or_default(),
        }
    }

    /// Fan events out to every connected member. A closed channel counts as
    /// a disconnect, which may itself produce events.
    fn broadcast(&mut self, events: Vec<ServerMessage>) {
        let mut pending = events;
        while !pending.is_empty() {
            let mut dead: Vec<PlayerId> = Vec::new();
            for event in &pending {
                for (player_id, tx) in &self.peers {
                    if tx.send(event.clone()).is_err() && !dead.contains(player_id) {
                        dead.push(player_id.clone());
                    }
                }
            }
            pending = Vec::new();
            for player_id in dead {
                warn!(
                    room_id = self.room.room_id(),
                    %player_id,
                    err = %RaceError::TransportFailure,
                    "dropping unreachable player"
                );
                pending.extend(self.drop_peer(&player_id));
            }
        }
    }

    /// Arm or disarm timers to match the phase the last command left us in.
    fn sync_timers(&mut self) {
        let phase = self.room.phase();
        let race_number = self.room.race_number();

        if phase == RacePhase::Countdown {
            if self.countdown.is_none() {
                let tick_tx = self.self_tx.clone();
                let go_tx = self.self_tx.clone();
                self.countdown = Some(Countdown::start(
                    self.room.rules().countdown_ticks,
                    self.ctx.config.tick_interval,
                    move |remaining| {
                        let _ = tick_tx.send(RoomCommand::CountdownTick {
                            race_number,
                            remaining,
                        });
                    },
                    move || {
                        let _ = go_tx.send(RoomCommand::CountdownGo { race_number });
                    },
                ));
            }
        } else if let Some(countdown) = self.countdown.take() {
            countdown.cancel();
        }

        if phase == RacePhase::Racing {
            if self.race_timer.is_none() {
                if let Some(timeout) = self.ctx.config.race_timeout {
                    let tx = self.self_tx.clone();
                    self.race_timer = Some(ScheduledTask::after(timeout, move || {
                        let _ = tx.send(RoomCommand::RaceTimeout { race_number });
                    }));
                }
            }
        } else {
            self.race_timer = None;
        }

        if phase == RacePhase::Finished {
            if self.settle_timer.is_none() {
                self.publish_results();
                let tx = self.self_tx.clone();
                self.settle_timer = Some(ScheduledTask::after(
                    self.ctx.config.settle_delay,
                    move || {
                        let _ = tx.send(RoomCommand::Settle { race_number });
                    },
                ));
            }
        } else {
            self.settle_timer = None;
        }
    }

    fn publish_results(&self) {
        let Some(summary) = self.room.summary() else {
            return;
        };
        info!(
            room_id = %summary.room_id,
            race_number = summary.race_number,
            finishers = summary.results.iter().filter(|r| r.placement.is_some()).count(),
            "race complete"
        );
        // No listeners is fine.
        let _ = self.ctx.results_tx.send(Arc::new(summary));
    }
}
