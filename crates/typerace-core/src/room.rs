//! Race room state machine.
//!
//! `Waiting -> Countdown -> Racing -> Finished -> Waiting`. Every operation
//! either returns the events to broadcast to the room or a [`RaceError`] for
//! the issuing player, in which case nothing changed. Callers must apply
//! operations one at a time; finishing order is the order `finish` is called.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::RaceError;
use crate::prompt::prompt_length;
use crate::protocol::{PlayerId, RacePhase, RaceResult, RaceSummary, ServerMessage};
use crate::ready::ReadyGate;
use crate::results::{FinishRecord, compute_results};
use crate::rules::RaceRules;
use crate::session::PlayerSession;

#[derive(Debug, Clone)]
pub struct RaceRoom {
    room_id: String,
    rules: RaceRules,
    campaign_race: Option<u32>,
    phase: RacePhase,
    members: BTreeMap<PlayerId, PlayerSession>,
    /// Joined while a race was running; promoted on reset.
    queued: BTreeMap<PlayerId, PlayerSession>,
    gate: ReadyGate,
    prompt: Option<String>,
    countdown_remaining: u32,
    race_number: u64,
    started_at: Option<Instant>,
    finishers: Vec<FinishRecord>,
    results: Option<Vec<RaceResult>>,
}

impl RaceRoom {
    pub fn new(room_id: impl Into<String>, rules: RaceRules, campaign_race: Option<u32>) -> Self {
        let rules = rules.normalized();
        Self {
            room_id: room_id.into(),
            gate: ReadyGate::new(rules.min_players_to_start),
            rules,
            campaign_race,
            phase: RacePhase::Waiting,
            members: BTreeMap::new(),
            queued: BTreeMap::new(),
            prompt: None,
            countdown_remaining: 0,
            race_number: 0,
            started_at: None,
            finishers: Vec::new(),
            results: None,
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn rules(&self) -> &RaceRules {
        &self.rules
    }

    pub fn race_number(&self) -> u64 {
        self.race_number
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }

    pub fn ready_count(&self) -> usize {
        self.gate.ready_count()
    }

    pub fn can_start(&self) -> bool {
        self.gate.can_start(self.phase)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn session(&self, player_id: &str) -> Option<&PlayerSession> {
        self.members.get(player_id)
    }

    pub fn is_queued(&self, player_id: &str) -> bool {
        self.queued.contains_key(player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.members.contains_key(player_id) || self.queued.contains_key(player_id)
    }

    pub fn is_connected(&self, player_id: &str) -> bool {
        self.members
            .get(player_id)
            .or_else(|| self.queued.get(player_id))
            .map(|s| s.connected)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.queued.is_empty()
    }

    pub fn results(&self) -> Option<&[RaceResult]> {
        self.results.as_deref()
    }

    pub fn finishing_order(&self) -> Vec<PlayerId> {
        self.finishers.iter().map(|f| f.player_id.clone()).collect()
    }

    /// Summary for result listeners, available while Finished.
    pub fn summary(&self) -> Option<RaceSummary> {
        let results = self.results.clone()?;
        Some(RaceSummary {
            room_id: self.room_id.clone(),
            race_number: self.race_number,
            prompt_length: self.prompt.as_deref().map(prompt_length).unwrap_or(0),
            campaign_race: self.campaign_race,
            results,
        })
    }

    pub fn player_list(&self) -> ServerMessage {
        let players = self
            .members
            .values()
            .map(|s| s.info(false))
            .chain(self.queued.values().map(|s| s.info(true)))
            .collect();
        ServerMessage::PlayerListUpdate {
            room_id: self.room_id.clone(),
            phase: self.phase,
            players,
            ready_count: self.gate.ready_count(),
            can_start: self.can_start(),
        }
    }

    /// What a player arriving now has missed of the current cycle.
    pub fn resume_events(&self) -> Vec<ServerMessage> {
        match self.phase {
            RacePhase::Waiting => Vec::new(),
            RacePhase::Countdown => vec![ServerMessage::CountdownTick {
                remaining: self.countdown_remaining,
            }],
            RacePhase::Racing => {
                let mut events = vec![ServerMessage::RaceStarted {
                    prompt: self.prompt.clone().unwrap_or_default(),
                }];
                events.extend(self.members.values().map(progress_event));
                events
            }
            RacePhase::Finished => vec![ServerMessage::RaceComplete {
                results: self.results.clone().unwrap_or_default(),
            }],
        }
    }

    // -- Membership -----------------------------------------------------------

    /// Admit a player. Mid-race arrivals are queued for the next cycle; a
    /// player already known to the room is marked connected again.
    pub fn join(&mut self, player_id: &str, name: &str) -> Result<Vec<ServerMessage>, RaceError> {
        if let Some(s) = self
            .members
            .get_mut(player_id)
            .or_else(|| self.queued.get_mut(player_id))
        {
            s.connected = true;
            s.name = name.to_string();
            return Ok(vec![self.player_list()]);
        }

        if self.members.len() + self.queued.len() >= self.rules.max_players {
            return Err(RaceError::RoomFull);
        }

        let session = PlayerSession::new(player_id, name);
        if self.phase == RacePhase::Waiting {
            self.members.insert(player_id.to_string(), session);
        } else {
            self.queued.insert(player_id.to_string(), session);
        }
        Ok(vec![self.player_list()])
    }

    /// Remove a player. Emptying the room mid-countdown aborts the
    /// countdown; mid-race, the race completes once nobody left is still
    /// typing.
    pub fn leave(&mut self, player_id: &str) -> Result<Vec<ServerMessage>, RaceError> {
        if self.queued.remove(player_id).is_some() {
            return Ok(vec![self.player_list()]);
        }
        if self.members.remove(player_id).is_none() {
            return Err(RaceError::NotInRoom);
        }
        self.gate.remove(player_id);

        let mut events = Vec::new();
        match self.phase {
            RacePhase::Countdown if self.members.is_empty() => {
                self.phase = RacePhase::Waiting;
                self.countdown_remaining = 0;
                self.promote_queued();
            }
            RacePhase::Racing if self.members.values().all(|s| s.finished) => {
                events.extend(self.complete());
            }
            _ => {}
        }
        events.insert(0, self.player_list());
        Ok(events)
    }

    /// Keep the seat but stop counting the player as reachable.
    pub fn mark_disconnected(&mut self, player_id: &str) -> Vec<ServerMessage> {
        match self
            .members
            .get_mut(player_id)
            .or_else(|| self.queued.get_mut(player_id))
        {
            Some(s) => {
                s.connected = false;
                vec![self.player_list()]
            }
            None => Vec::new(),
        }
    }

    // -- Waiting --------------------------------------------------------------

    pub fn set_ready(
        &mut self,
        player_id: &str,
        is_ready: bool,
    ) -> Result<Vec<ServerMessage>, RaceError> {
        if !self.members.contains_key(player_id) {
            return Err(if self.queued.contains_key(player_id) {
                RaceError::InvalidPhase { phase: self.phase }
            } else {
                RaceError::NotInRoom
            });
        }
        self.gate.set_ready(self.phase, player_id, is_ready)?;
        if let Some(s) = self.members.get_mut(player_id) {
            s.ready = is_ready;
        }
        Ok(vec![self.player_list()])
    }

    /// Enter the countdown. Any ready member may trigger it once the quorum
    /// is reached.
    pub fn start(&mut self, player_id: &str) -> Result<Vec<ServerMessage>, RaceError> {
        if self.phase != RacePhase::Waiting {
            return Err(RaceError::InvalidPhase { phase: self.phase });
        }
        if !self.members.contains_key(player_id) {
            return Err(RaceError::NotInRoom);
        }
        if !self.gate.is_ready(player_id) || !self.can_start() {
            return Err(RaceError::CannotStart);
        }
        self.phase = RacePhase::Countdown;
        self.countdown_remaining = self.rules.countdown_ticks;
        self.race_number += 1;
        Ok(vec![self.player_list()])
    }

    // -- Countdown ------------------------------------------------------------

    pub fn countdown_tick(&mut self, remaining: u32) -> Vec<ServerMessage> {
        if self.phase != RacePhase::Countdown {
            return Vec::new();
        }
        self.countdown_remaining = remaining;
        vec![ServerMessage::CountdownTick { remaining }]
    }

    /// Countdown reached zero: fix the prompt and start the room clock.
    pub fn begin_race(&mut self, prompt: String, now: Instant) -> Vec<ServerMessage> {
        if self.phase != RacePhase::Countdown {
            return Vec::new();
        }
        self.phase = RacePhase::Racing;
        self.countdown_remaining = 0;
        self.started_at = Some(now);
        self.finishers.clear();
        for s in self.members.values_mut() {
            s.reset_progress();
        }
        self.prompt = Some(prompt.clone());
        vec![ServerMessage::RaceStarted { prompt }]
    }

    // -- Racing ---------------------------------------------------------------

    fn racing_session(&mut self, player_id: &str) -> Result<&mut PlayerSession, RaceError> {
        match self.phase {
            RacePhase::Racing => {}
            RacePhase::Finished => return Err(RaceError::RaceAlreadyComplete),
            phase => return Err(RaceError::InvalidPhase { phase }),
        }
        if self.queued.contains_key(player_id) {
            return Err(RaceError::InvalidPhase { phase: self.phase });
        }
        self.members.get_mut(player_id).ok_or(RaceError::NotInRoom)
    }

    pub fn record_progress(
        &mut self,
        player_id: &str,
        progress: f64,
        wpm: u32,
        accuracy: f64,
    ) -> Result<Vec<ServerMessage>, RaceError> {
        let session = self.racing_session(player_id)?;
        session.record_progress(progress, wpm, accuracy)?;
        Ok(vec![progress_event(session)])
    }

    /// Record a finish on the room clock. Placement is the order in which
    /// finishes are processed here, not the client's own timing.
    pub fn finish(
        &mut self,
        player_id: &str,
        wpm: u32,
        accuracy: f64,
        now: Instant,
    ) -> Result<Vec<ServerMessage>, RaceError> {
        let started_at = self.started_at.unwrap_or(now);
        let session = self.racing_session(player_id)?;
        if session.finished {
            return Err(RaceError::StaleUpdate);
        }
        let finish_time = now.saturating_duration_since(started_at).as_millis() as u64;
        session.mark_finished(wpm, accuracy, finish_time);
        let record = FinishRecord::from_session(session);
        self.finishers.push(record);

        let mut events = vec![ServerMessage::PlayerFinished {
            player_id: player_id.to_string(),
            finish_time,
        }];
        if self.members.values().all(|s| s.finished) {
            events.extend(self.complete());
        }
        Ok(events)
    }

    /// Overall race timeout: whoever has not finished is DNF.
    pub fn expire(&mut self) -> Vec<ServerMessage> {
        if self.phase != RacePhase::Racing {
            return Vec::new();
        }
        self.complete()
    }

    fn complete(&mut self) -> Vec<ServerMessage> {
        self.phase = RacePhase::Finished;
        let dnf: Vec<PlayerSession> = self
            .members
            .values()
            .filter(|s| !s.finished)
            .cloned()
            .collect();
        let results = compute_results(
            &self.finishers,
            &dnf,
            self.prompt.as_deref().map(prompt_length).unwrap_or(0),
            self.campaign_race,
            self.rules.dnf_xp,
        );
        self.results = Some(results.clone());
        vec![ServerMessage::RaceComplete { results }]
    }

    // -- Finished -------------------------------------------------------------

    /// Start the next cycle with a fresh gate and rearmed trackers.
    pub fn reset(&mut self) -> Vec<ServerMessage> {
        if self.phase != RacePhase::Finished {
            return Vec::new();
        }
        self.phase = RacePhase::Waiting;
        self.gate = ReadyGate::new(self.rules.min_players_to_start);
        self.finishers.clear();
        self.results = None;
        self.prompt = None;
        self.started_at = None;
        for s in self.members.values_mut() {
            s.rearm();
        }
        self.promote_queued();
        vec![self.player_list()]
    }

    /// Seat everyone waiting for the next cycle.
    fn promote_queued(&mut self) {
        for (id, mut s) in std::mem::take(&mut self.queued) {
            s.rearm();
            self.members.insert(id, s);
        }
    }
}

fn progress_event(session: &PlayerSession) -> ServerMessage {
    ServerMessage::PlayerProgress {
        player_id: session.player_id.clone(),
        progress: session.progress,
        wpm: session.wpm,
        accuracy: session.accuracy,
    }
}
