use std::collections::HashSet;

use crate::error::RaceError;
use crate::protocol::{PlayerId, RacePhase};

/// Ready votes for one room, and the quorum needed to start.
#[derive(Debug, Clone, Default)]
pub struct ReadyGate {
    min_players_to_start: usize,
    ready: HashSet<PlayerId>,
}

impl ReadyGate {
    pub fn new(min_players_to_start: usize) -> Self {
        Self {
            min_players_to_start: min_players_to_start.max(2),
            ready: HashSet::new(),
        }
    }

    /// Record a vote. Only allowed while the room is waiting.
    pub fn set_ready(
        &mut self,
        phase: RacePhase,
        player_id: &str,
        is_ready: bool,
    ) -> Result<(), RaceError> {
        if phase != RacePhase::Waiting {
            return Err(RaceError::InvalidPhase { phase });
        }
        if is_ready {
            self.ready.insert(player_id.to_string());
        } else {
            self.ready.remove(player_id);
        }
        Ok(())
    }

    pub fn is_ready(&self, player_id: &str) -> bool {
        self.ready.contains(player_id)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn can_start(&self, phase: RacePhase) -> bool {
        phase == RacePhase::Waiting && self.ready_count() >= self.min_players_to_start
    }

    pub fn remove(&mut self, player_id: &str) {
        self.ready.remove(player_id);
    }

    pub fn min_players_to_start(&self) -> usize {
        self.min_players_to_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_of_two_by_default() {
        let mut gate = ReadyGate::new(2);
        gate.set_ready(RacePhase::Waiting, "a", true).unwrap();
        assert!(!gate.can_start(RacePhase::Waiting));
        gate.set_ready(RacePhase::Waiting, "b", true).unwrap();
        assert!(gate.can_start(RacePhase::Waiting));
        assert_eq!(gate.ready_count(), 2);
    }

    #[test]
    fn configured_quorum() {
        let mut gate = ReadyGate::new(3);
        for p in ["a", "b"] {
            gate.set_ready(RacePhase::Waiting, p, true).unwrap();
        }
        assert!(!gate.can_start(RacePhase::Waiting));
        gate.set_ready(RacePhase::Waiting, "c", true).unwrap();
        assert!(gate.can_start(RacePhase::Waiting));
    }

    #[test]
    fn quorum_below_two_is_raised() {
        let mut gate = ReadyGate::new(1);
        gate.set_ready(RacePhase::Waiting, "a", true).unwrap();
        assert!(!gate.can_start(RacePhase::Waiting));
        assert_eq!(gate.min_players_to_start(), 2);
    }

    #[test]
    fn votes_outside_waiting_are_rejected_without_mutation() {
        let mut gate = ReadyGate::new(2);
        gate.set_ready(RacePhase::Waiting, "a", true).unwrap();
        for phase in [RacePhase::Countdown, RacePhase::Racing, RacePhase::Finished] {
            assert_eq!(
                gate.set_ready(phase, "b", true),
                Err(RaceError::InvalidPhase { phase })
            );
            assert_eq!(
                gate.set_ready(phase, "a", false),
                Err(RaceError::InvalidPhase { phase })
            );
        }
        assert_eq!(gate.ready_count(), 1);
        assert!(gate.is_ready("a"));
    }

    #[test]
    fn cannot_start_outside_waiting() {
        let mut gate = ReadyGate::new(2);
        gate.set_ready(RacePhase::Waiting, "a", true).unwrap();
        gate.set_ready(RacePhase::Waiting, "b", true).unwrap();
        for phase in [RacePhase::Countdown, RacePhase::Racing, RacePhase::Finished] {
            assert!(!gate.can_start(phase));
        }
    }

    #[test]
    fn unready_and_remove() {
        let mut gate = ReadyGate::new(2);
        gate.set_ready(RacePhase::Waiting, "a", true).unwrap();
        gate.set_ready(RacePhase::Waiting, "b", true).unwrap();
        gate.set_ready(RacePhase::Waiting, "a", false).unwrap();
        assert_eq!(gate.ready_count(), 1);
        gate.remove("b");
        assert_eq!(gate.ready_count(), 0);
    }
}
