use thiserror::Error;

use crate::protocol::{ErrorCode, RacePhase};

/// Expected control conditions reported back to the issuing client only.
/// None of these change room state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceError {
    #[error("command not valid while the room is {}", .phase.label())]
    InvalidPhase { phase: RacePhase },
    #[error("race cannot start: not enough ready players")]
    CannotStart,
    #[error("stale progress update")]
    StaleUpdate,
    #[error("race already complete")]
    RaceAlreadyComplete,
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("not in a room")]
    NotInRoom,
    #[error("connection lost")]
    TransportFailure,
}

impl RaceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RaceError::InvalidPhase { .. } => ErrorCode::InvalidPhase,
            RaceError::CannotStart => ErrorCode::CannotStart,
            RaceError::StaleUpdate => ErrorCode::StaleUpdate,
            RaceError::RaceAlreadyComplete => ErrorCode::RaceAlreadyComplete,
            RaceError::RoomNotFound => ErrorCode::RoomNotFound,
            RaceError::RoomFull => ErrorCode::RoomFull,
            RaceError::NotInRoom => ErrorCode::NotInRoom,
            RaceError::TransportFailure => ErrorCode::TransportFailure,
        }
    }

    /// Rejections the client should not be bothered with.
    pub fn is_silent(&self) -> bool {
        matches!(self, RaceError::StaleUpdate)
    }
}
