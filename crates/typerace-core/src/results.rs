use crate::protocol::{PlayerId, RaceResult};
use crate::rules::DnfXpPolicy;
use crate::session::PlayerSession;
use crate::xp::{calculate_xp, partial_xp};

/// Snapshot taken when a finish command is processed. Kept even if the
/// player leaves before the race completes.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishRecord {
    pub player_id: PlayerId,
    pub name: String,
    pub wpm: u32,
    pub accuracy: f64,
    pub finish_time: u64,
}

impl FinishRecord {
    pub fn from_session(session: &PlayerSession) -> Self {
        Self {
            player_id: session.player_id.clone(),
            name: session.name.clone(),
            wpm: session.wpm,
            accuracy: session.accuracy,
            finish_time: session.finish_time.unwrap_or_default(),
        }
    }
}

/// Characters typed at a given completion percentage.
pub fn characters_at(prompt_length: u32, progress: f64) -> u32 {
    (prompt_length as f64 * progress.clamp(0.0, 100.0) / 100.0).floor() as u32
}

/// Placements follow the order of `finishers`; DNF players come after
/// every finisher, unplaced and sorted by player id.
pub fn compute_results(
    finishers: &[FinishRecord],
    dnf: &[PlayerSession],
    prompt_length: u32,
    campaign_race: Option<u32>,
    dnf_xp: DnfXpPolicy,
) -> Vec<RaceResult> {
    let mut results: Vec<RaceResult> = finishers
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let placement = i as u32 + 1;
            RaceResult {
                player_id: f.player_id.clone(),
                name: f.name.clone(),
                placement: Some(placement),
                wpm: f.wpm,
                accuracy: f.accuracy,
                characters_typed: prompt_length,
                finish_time: Some(f.finish_time),
                xp_awarded: calculate_xp(placement, prompt_length, campaign_race),
            }
        })
        .collect();

    let mut unfinished: Vec<&PlayerSession> = dnf.iter().collect();
    unfinished.sort_by(|a, b| a.player_id.cmp(&b.player_id));

    results.extend(unfinished.into_iter().map(|s| {
        let characters_typed = characters_at(prompt_length, s.progress);
        RaceResult {
            player_id: s.player_id.clone(),
            name: s.name.clone(),
            placement: None,
            wpm: s.wpm,
            accuracy: s.accuracy,
            characters_typed,
            finish_time: None,
            xp_awarded: match dnf_xp {
                DnfXpPolicy::None => 0,
                DnfXpPolicy::Partial => partial_xp(characters_typed),
            },
        }
    }));

    results
}
