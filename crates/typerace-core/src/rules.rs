use serde::{Deserialize, Serialize};

/// Whether players who never finish earn anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnfXpPolicy {
    #[default]
    None,
    /// XP on the characters typed before the race ended, at the lowest multiplier.
    Partial,
}

impl DnfXpPolicy {
    pub fn parse(raw: &str) -> Option<DnfXpPolicy> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(DnfXpPolicy::None),
            "partial" => Some(DnfXpPolicy::Partial),
            _ => None,
        }
    }
}

/// Per-room race policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceRules {
    pub min_players_to_start: usize,
    pub max_players: usize,
    pub countdown_ticks: u32,
    pub dnf_xp: DnfXpPolicy,
}

impl Default for RaceRules {
    fn default() -> Self {
        Self {
            min_players_to_start: 2,
            max_players: 8,
            countdown_ticks: 3,
            dnf_xp: DnfXpPolicy::None,
        }
    }
}

impl RaceRules {
    /// Clamp to values a room can honour.
    pub fn normalized(mut self) -> Self {
        self.min_players_to_start = self.min_players_to_start.max(2);
        self.max_players = self.max_players.max(self.min_players_to_start);
        self.countdown_ticks = self.countdown_ticks.max(1);
        self
    }
}
