use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QuestError {
    #[error("{0}")]
    NotFound(String),
    #[error("mission {mission_id} already completed by user {user_id}")]
    AlreadyCompleted { user_id: i64, mission_id: i64 },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Level thresholds, ordered ascending. A user is at the highest level whose
/// minimum xp does not exceed their accumulated xp.
pub const LEVEL_THRESHOLDS: [(u32, i64); 5] = [(1, 0), (2, 50), (3, 150), (4, 300), (5, 500)];

#[must_use]
pub fn max_level() -> u32 {
    LEVEL_THRESHOLDS[LEVEL_THRESHOLDS.len() - 1].0
}

#[must_use]
pub fn level_for_xp(xp: i64) -> u32 {
    let mut level = 1;
    for (candidate, threshold) in LEVEL_THRESHOLDS {
        if xp >= threshold {
            level = candidate;
        }
    }
    level
}

#[must_use]
pub fn level_threshold(level: u32) -> Option<i64> {
    LEVEL_THRESHOLDS
        .iter()
        .find(|(candidate, _)| *candidate == level)
        .map(|(_, threshold)| *threshold)
}

/// The xp required for the next level, or `None` at or above the top
/// defined level.
#[must_use]
pub fn next_level_threshold(level: u32) -> Option<i64> {
    level_threshold(level + 1)
}

/// Integer percentage of the way from `level`'s threshold to the next one.
/// Clamped to 0..=100; always 100 at or above the top defined level.
#[must_use]
pub fn progress_percent(xp: i64, level: u32) -> u8 {
    let Some(next) = next_level_threshold(level) else {
        return 100;
    };
    let current = level_threshold(level).unwrap_or(0);
    if next <= current {
        return 100;
    }
    let percent = ((xp - current) * 100) / (next - current);
    u8::try_from(percent.clamp(0, 100)).unwrap_or(100)
}

/// One-time reward labels for specific levels. Levels outside the table
/// grant nothing.
#[must_use]
pub fn reward_for_level(level: u32) -> Option<&'static str> {
    match level {
        2 => Some("Récompense: Badge de Boulanger Novice"),
        3 => Some("Récompense: Badge de Boulanger Expert"),
        4 => Some("Récompense: Badge de Boulanger Pro"),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Life {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Mission {
    pub id: i64,
    pub life_id: i64,
    pub level_number: u32,
    pub title: String,
    pub description: String,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LifeProgress {
    pub id: i64,
    pub user_id: i64,
    pub life_id: i64,
    pub xp: i64,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MissionCompletion {
    pub id: i64,
    pub user_id: i64,
    pub mission_id: i64,
    pub completed: bool,
    pub completed_at: OffsetDateTime,
    pub user_photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RewardGrant {
    pub id: i64,
    pub user_id: i64,
    pub reward_name: String,
    pub rewarded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CompletionInput {
    pub user_id: i64,
    pub mission_id: i64,
    pub user_photo_url: Option<String>,
}

impl CompletionInput {
    /// Validates a completion request before it reaches the store.
    ///
    /// # Errors
    /// Returns [`QuestError::Validation`] when an id is non-positive or the
    /// photo URL is present but blank.
    pub fn validate(&self) -> Result<(), QuestError> {
        if self.user_id < 1 {
            return Err(QuestError::Validation("user_id MUST be >= 1".to_string()));
        }

        if self.mission_id < 1 {
            return Err(QuestError::Validation(
                "mission_id MUST be >= 1".to_string(),
            ));
        }

        if let Some(url) = &self.user_photo_url {
            if url.trim().is_empty() {
                return Err(QuestError::Validation(
                    "user_photo_url MUST NOT be blank when provided".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CompletionOutcome {
    pub new_xp: i64,
    pub new_level: u32,
    pub reward: Option<String>,
}

/// Settles a mission completion against the current xp total: adds the
/// mission's points, recomputes the level, and grants the landing level's
/// reward iff the level rose.
///
/// # Errors
/// Returns [`QuestError::Validation`] when `xp` is negative or `points` is
/// not positive.
pub fn apply_completion(xp: i64, points: i64) -> Result<CompletionOutcome, QuestError> {
    if xp < 0 {
        return Err(QuestError::Validation("xp MUST be >= 0".to_string()));
    }

    if points < 1 {
        return Err(QuestError::Validation(
            "mission points MUST be >= 1".to_string(),
        ));
    }

    let previous_level = level_for_xp(xp);
    let new_xp = xp + points;
    let new_level = level_for_xp(new_xp);

    let reward = if new_level > previous_level {
        reward_for_level(new_level).map(str::to_string)
    } else {
        None
    };

    Ok(CompletionOutcome {
        new_xp,
        new_level,
        reward,
    })
}

/// Parses an RFC 3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`QuestError::Validation`] when parsing fails or the timestamp
/// is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, QuestError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| QuestError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(QuestError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC 3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`QuestError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, QuestError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| QuestError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn level_for_xp_matches_threshold_table() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(49), 1);
        assert_eq!(level_for_xp(50), 2);
        assert_eq!(level_for_xp(149), 2);
        assert_eq!(level_for_xp(150), 3);
        assert_eq!(level_for_xp(299), 3);
        assert_eq!(level_for_xp(300), 4);
        assert_eq!(level_for_xp(499), 4);
        assert_eq!(level_for_xp(500), 5);
        assert_eq!(level_for_xp(10_000), 5);
    }

    #[test]
    fn level_for_xp_floors_at_one() {
        assert_eq!(level_for_xp(-10), 1);
    }

    #[test]
    fn next_level_threshold_walks_the_table() {
        assert_eq!(next_level_threshold(1), Some(50));
        assert_eq!(next_level_threshold(4), Some(500));
        assert_eq!(next_level_threshold(5), None);
        assert_eq!(next_level_threshold(9), None);
    }

    #[test]
    fn progress_percent_is_zero_at_exact_threshold() {
        assert_eq!(progress_percent(0, 1), 0);
        assert_eq!(progress_percent(50, 2), 0);
        assert_eq!(progress_percent(300, 4), 0);
    }

    #[test]
    fn progress_percent_approaches_but_never_reaches_hundred() {
        assert_eq!(progress_percent(49, 1), 98);
        assert_eq!(progress_percent(149, 2), 99);
        assert_eq!(progress_percent(499, 4), 99);
    }

    #[test]
    fn progress_percent_is_hundred_at_or_above_max_level() {
        assert_eq!(progress_percent(500, 5), 100);
        assert_eq!(progress_percent(9_999, 5), 100);
        assert_eq!(progress_percent(600, 8), 100);
    }

    #[test]
    fn progress_percent_midpoints() {
        assert_eq!(progress_percent(45, 1), 90);
        assert_eq!(progress_percent(55, 2), 5);
        assert_eq!(progress_percent(225, 3), 50);
    }

    #[test]
    fn rewards_are_mapped_for_levels_two_through_four() {
        assert_eq!(reward_for_level(1), None);
        assert_eq!(
            reward_for_level(2),
            Some("Récompense: Badge de Boulanger Novice")
        );
        assert_eq!(
            reward_for_level(3),
            Some("Récompense: Badge de Boulanger Expert")
        );
        assert_eq!(
            reward_for_level(4),
            Some("Récompense: Badge de Boulanger Pro")
        );
        assert_eq!(reward_for_level(5), None);
    }

    #[test]
    fn completion_without_level_up_grants_nothing() {
        let outcome = must_ok(apply_completion(0, 10));
        assert_eq!(outcome.new_xp, 10);
        assert_eq!(outcome.new_level, 1);
        assert_eq!(outcome.reward, None);
    }

    #[test]
    fn completion_crossing_a_threshold_grants_the_mapped_reward() {
        let outcome = must_ok(apply_completion(45, 10));
        assert_eq!(outcome.new_xp, 55);
        assert_eq!(outcome.new_level, 2);
        assert_eq!(
            outcome.reward.as_deref(),
            Some("Récompense: Badge de Boulanger Novice")
        );
    }

    #[test]
    fn completion_within_a_level_grants_nothing() {
        let outcome = must_ok(apply_completion(55, 10));
        assert_eq!(outcome.new_xp, 65);
        assert_eq!(outcome.new_level, 2);
        assert_eq!(outcome.reward, None);
    }

    #[test]
    fn multi_level_jump_grants_only_the_landing_reward() {
        let outcome = must_ok(apply_completion(0, 200));
        assert_eq!(outcome.new_level, 3);
        assert_eq!(
            outcome.reward.as_deref(),
            Some("Récompense: Badge de Boulanger Expert")
        );
    }

    #[test]
    fn landing_on_an_unmapped_level_grants_nothing() {
        let outcome = must_ok(apply_completion(45, 500));
        assert_eq!(outcome.new_level, 5);
        assert_eq!(outcome.reward, None);
    }

    #[test]
    fn non_positive_points_are_rejected() {
        assert!(apply_completion(10, 0).is_err());
        assert!(apply_completion(10, -5).is_err());
    }

    #[test]
    fn negative_xp_is_rejected() {
        assert!(apply_completion(-1, 10).is_err());
    }

    #[test]
    fn completion_input_rejects_bad_ids_and_blank_photo() {
        let valid = CompletionInput {
            user_id: 1,
            mission_id: 7,
            user_photo_url: Some("https://example.test/p.jpg".to_string()),
        };
        assert!(valid.validate().is_ok());

        let bad_user = CompletionInput {
            user_id: 0,
            ..valid.clone()
        };
        assert!(bad_user.validate().is_err());

        let bad_mission = CompletionInput {
            mission_id: -3,
            ..valid.clone()
        };
        assert!(bad_mission.validate().is_err());

        let blank_photo = CompletionInput {
            user_photo_url: Some("   ".to_string()),
            ..valid
        };
        assert!(blank_photo.validate().is_err());
    }

    #[test]
    fn parse_rfc3339_requires_utc() {
        assert!(parse_rfc3339_utc("2026-08-06T12:00:00Z").is_ok());
        assert!(parse_rfc3339_utc("2026-08-06T12:00:00+02:00").is_err());
        assert!(parse_rfc3339_utc("not-a-timestamp").is_err());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let parsed = must_ok(parse_rfc3339_utc("2026-08-06T12:34:56Z"));
        assert_eq!(must_ok(format_rfc3339(parsed)), "2026-08-06T12:34:56Z");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_level_is_non_decreasing_in_xp(xp in 0i64..2_000, delta in 0i64..2_000) {
            prop_assert!(level_for_xp(xp + delta) >= level_for_xp(xp));
        }

        #[test]
        fn prop_level_threshold_brackets_xp(xp in 0i64..2_000) {
            let level = level_for_xp(xp);
            let floor = level_threshold(level).unwrap_or(0);
            prop_assert!(xp >= floor);
            if let Some(next) = next_level_threshold(level) {
                prop_assert!(xp < next);
            }
        }

        #[test]
        fn prop_progress_percent_stays_in_bounds(xp in 0i64..2_000) {
            let level = level_for_xp(xp);
            let percent = progress_percent(xp, level);
            prop_assert!(percent <= 100);
            if level < max_level() {
                prop_assert!(percent < 100);
            }
        }
    }
}
