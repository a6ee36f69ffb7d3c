/// Flat XP every finisher receives.
pub const BASE_XP: u32 = 8;

/// Multiplier for 4th place and below, and for partial DNF credit.
const LOWEST_MULTIPLIER: u32 = 25;

/// Placement multiplier in hundredths: 1st 1.0, 2nd 0.5, 3rd 0.33, rest 0.25.
pub fn position_multiplier(placement: u32) -> u32 {
    match placement {
        1 => 100,
        2 => 50,
        3 => 33,
        _ => LOWEST_MULTIPLIER,
    }
}

/// Bonus for campaign races: 25 + 10 per campaign race number. The race
/// number comes from the client, so the sum saturates.
pub fn campaign_bonus(campaign_race: Option<u32>) -> u32 {
    match campaign_race {
        Some(n) => n.saturating_mul(10).saturating_add(25),
        None => 0,
    }
}

/// XP awarded to a finisher.
pub fn calculate_xp(placement: u32, characters_typed: u32, campaign_race: Option<u32>) -> u32 {
    let character_xp = scaled(characters_typed, position_multiplier(placement));
    BASE_XP
        .saturating_add(character_xp)
        .saturating_add(campaign_bonus(campaign_race))
        .max(1)
}

/// XP for a player who did not finish, credited at the lowest multiplier.
pub fn partial_xp(characters_typed: u32) -> u32 {
    BASE_XP
        .saturating_add(scaled(characters_typed, LOWEST_MULTIPLIER))
        .max(1)
}

/// `floor(chars * hundredths / 100)` without overflowing.
fn scaled(characters_typed: u32, hundredths: u32) -> u32 {
    (u64::from(characters_typed) * u64::from(hundredths) / 100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_place_full_multiplier() {
        assert_eq!(calculate_xp(1, 100, None), 108);
    }

    #[test]
    fn second_place_half() {
        assert_eq!(calculate_xp(2, 100, None), 58);
    }

    #[test]
    fn third_place_floors() {
        assert_eq!(calculate_xp(3, 100, None), 41);
        // 0.33 * 7 = 2.31
        assert_eq!(calculate_xp(3, 7, None), 10);
    }

    #[test]
    fn fourth_and_below() {
        assert_eq!(calculate_xp(4, 100, None), 33);
        assert_eq!(calculate_xp(12, 100, None), 33);
    }

    #[test]
    fn campaign_bonus_added() {
        assert_eq!(calculate_xp(2, 100, Some(2)), 103);
        assert_eq!(campaign_bonus(Some(0)), 25);
    }

    #[test]
    fn huge_campaign_number_saturates() {
        assert_eq!(campaign_bonus(Some(u32::MAX)), u32::MAX);
        assert_eq!(calculate_xp(1, 100, Some(u32::MAX)), u32::MAX);
        assert_eq!(calculate_xp(4, u32::MAX, None), BASE_XP + u32::MAX / 4);
    }

    #[test]
    fn empty_prompt_still_earns_base() {
        assert_eq!(calculate_xp(1, 0, None), 8);
        assert_eq!(partial_xp(0), 8);
    }

    #[test]
    fn better_placement_never_earns_less() {
        for chars in [0, 1, 37, 100, 350] {
            let mut last = u32::MAX;
            for placement in 1..=6 {
                let xp = calculate_xp(placement, chars, None);
                assert!(xp <= last);
                last = xp;
            }
        }
    }
}
