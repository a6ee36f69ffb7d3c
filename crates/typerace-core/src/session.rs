use crate::error::RaceError;
use crate::protocol::{PlayerId, PlayerInfo};

/// One player's state inside a room.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub name: String,
    pub ready: bool,
    pub progress: f64,
    pub wpm: u32,
    pub accuracy: f64,
    pub finished: bool,
    /// Milliseconds since race start, captured once.
    pub finish_time: Option<u64>,
    pub connected: bool,
}

/// Clamp a client-reported percentage into [0, 100].
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

impl PlayerSession {
    pub fn new(player_id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            name: name.into(),
            ready: false,
            progress: 0.0,
            wpm: 0,
            accuracy: 0.0,
            finished: false,
            finish_time: None,
            connected: true,
        }
    }

    /// Store the latest progress sample. Out-of-range values are clamped;
    /// a regression or an update after finishing is rejected.
    pub fn record_progress(
        &mut self,
        progress: f64,
        wpm: u32,
        accuracy: f64,
    ) -> Result<(), RaceError> {
        if self.finished {
            return Err(RaceError::StaleUpdate);
        }
        let progress = clamp_percent(progress);
        if progress < self.progress {
            return Err(RaceError::StaleUpdate);
        }
        self.progress = progress;
        self.wpm = wpm;
        self.accuracy = clamp_percent(accuracy);
        Ok(())
    }

    /// Pin the session at 100% with its final stats.
    pub fn mark_finished(&mut self, wpm: u32, accuracy: f64, finish_time: u64) {
        self.progress = 100.0;
        self.wpm = wpm;
        self.accuracy = clamp_percent(accuracy);
        self.finished = true;
        self.finish_time = Some(finish_time);
    }

    /// Back to the starting line for the next race.
    pub fn rearm(&mut self) {
        self.ready = false;
        self.reset_progress();
    }

    /// Zero the tracker without touching the ready vote.
    pub fn reset_progress(&mut self) {
        self.progress = 0.0;
        self.wpm = 0;
        self.accuracy = 0.0;
        self.finished = false;
        self.finish_time = None;
    }

    pub fn info(&self, queued: bool) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id.clone(),
            name: self.name.clone(),
            ready: self.ready,
            progress: self.progress,
            finished: self.finished,
            connected: self.connected,
            queued,
        }
    }
}
