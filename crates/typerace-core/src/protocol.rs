use serde::{Deserialize, Serialize};

/// Stable player identity, supplied by the client on connect.
pub type PlayerId = String;

/// Race room lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RacePhase {
    Waiting,
    Countdown,
    Racing,
    Finished,
}

impl RacePhase {
    pub fn label(&self) -> &'static str {
        match self {
            RacePhase::Waiting => "waiting",
            RacePhase::Countdown => "countdown",
            RacePhase::Racing => "racing",
            RacePhase::Finished => "finished",
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Join {
        room_id: String,
        /// Campaign race number; only honoured by the join that creates the room.
        #[serde(default)]
        campaign_race: Option<u32>,
    },
    SetReady {
        is_ready: bool,
    },
    StartRace,
    Progress {
        progress: f64,
        wpm: u32,
        accuracy: f64,
    },
    Finish {
        wpm: u32,
        accuracy: f64,
    },
    Leave,
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    PlayerListUpdate {
        room_id: String,
        phase: RacePhase,
        players: Vec<PlayerInfo>,
        ready_count: usize,
        can_start: bool,
    },
    CountdownTick {
        remaining: u32,
    },
    RaceStarted {
        prompt: String,
    },
    PlayerProgress {
        player_id: PlayerId,
        progress: f64,
        wpm: u32,
        accuracy: f64,
    },
    PlayerFinished {
        player_id: PlayerId,
        /// Milliseconds since the race started, on the room clock.
        finish_time: u64,
    },
    RaceComplete {
        results: Vec<RaceResult>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

/// One row of the player list broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: PlayerId,
    pub name: String,
    pub ready: bool,
    pub progress: f64,
    pub finished: bool,
    pub connected: bool,
    /// Joined mid-race; races from the next cycle.
    pub queued: bool,
}

/// Final standing of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub player_id: PlayerId,
    pub name: String,
    /// `None` for players that did not finish.
    pub placement: Option<u32>,
    pub wpm: u32,
    pub accuracy: f64,
    pub characters_typed: u32,
    pub finish_time: Option<u64>,
    pub xp_awarded: u32,
}

/// Result summary handed to downstream listeners once per race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    pub room_id: String,
    pub race_number: u64,
    pub prompt_length: u32,
    pub campaign_race: Option<u32>,
    pub results: Vec<RaceResult>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPhase,
    CannotStart,
    StaleUpdate,
    RaceAlreadyComplete,
    RoomNotFound,
    RoomFull,
    NotInRoom,
    TransportFailure,
    InvalidMessage,
    RateLimited,
}

/// Live room row returned by the REST API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room_id: String,
    pub phase: RacePhase,
    pub members: usize,
    pub race_number: u64,
}

/// Race log row returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceLogEntry {
    pub race_id: i64,
    pub room_id: String,
    pub race_number: u64,
    pub prompt_length: u32,
    pub campaign_race: Option<u32>,
    pub created_at: String,
    pub results: Vec<RaceResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_type_tag() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"Join","room_id":"R1"}"#).unwrap();
        match msg {
            ClientMessage::Join { room_id, campaign_race } => {
                assert_eq!(room_id, "R1");
                assert_eq!(campaign_race, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"StartRace"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::StartRace));
    }

    #[test]
    fn error_codes_are_screaming_case() {
        let json = serde_json::to_value(ServerMessage::Error {
            code: ErrorCode::RaceAlreadyComplete,
            message: "race already complete".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["code"], "RACE_ALREADY_COMPLETE");
    }

    #[test]
    fn dnf_placement_serializes_as_null() {
        let result = RaceResult {
            player_id: "p1".into(),
            name: "p1".into(),
            placement: None,
            wpm: 0,
            accuracy: 0.0,
            characters_typed: 12,
            finish_time: None,
            xp_awarded: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["placement"].is_null());
    }
}
