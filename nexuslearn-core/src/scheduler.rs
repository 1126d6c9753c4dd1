//! Spaced-repetition scheduling.
//!
//! A card's state is its mastery level. Every review moves it along the
//! level ladder and pushes its next review time forward:
//!
//! | confidence | new level            | delay                |
//! |------------|----------------------|----------------------|
//! | again      | 0                    | 5 minutes            |
//! | hard       | `max(0, level - 1)`  | 12 hours             |
//! | good       | `level + 1`          | 2 days × new level   |
//! | easy       | `level + 2`          | 4 days × new level   |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::Flashcard;

pub const AGAIN_DELAY_MINUTES: i64 = 5;
pub const HARD_DELAY_HOURS: i64 = 12;
pub const GOOD_DAYS_PER_LEVEL: i64 = 2;
pub const EASY_DAYS_PER_LEVEL: i64 = 4;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Again,
    Hard,
    Good,
    Easy,
}

impl Confidence {
    pub const ALL: [Confidence; 4] = [
        Confidence::Again,
        Confidence::Hard,
        Confidence::Good,
        Confidence::Easy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Again => "again",
            Confidence::Hard => "hard",
            Confidence::Good => "good",
            Confidence::Easy => "easy",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confidence label that is not one of `again`, `hard`, `good`, `easy`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid confidence level: {0:?}")]
pub struct InvalidConfidence(pub String);

impl FromStr for Confidence {
    type Err = InvalidConfidence;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "again" => Ok(Confidence::Again),
            "hard" => Ok(Confidence::Hard),
            "good" => Ok(Confidence::Good),
            "easy" => Ok(Confidence::Easy),
            _ => Err(InvalidConfidence(s.to_string())),
        }
    }
}

/// Last instant with a four-digit year, so stored timestamps stay RFC 3339.
pub fn latest_review_at() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub new_level: u32,
    pub next_review_at: DateTime<Utc>,
}

/// Computes the level and due time that follow one review at `now`.
///
/// Pure: the only clock is the `now` argument. Levels saturate at `u32::MAX`
/// and due times saturate at [`latest_review_at`].
pub fn schedule(current_level: u32, confidence: Confidence, now: DateTime<Utc>) -> Schedule {
    let (new_level, delay) = match confidence {
        Confidence::Again => (0, Duration::minutes(AGAIN_DELAY_MINUTES)),
        Confidence::Hard => (
            current_level.saturating_sub(1),
            Duration::hours(HARD_DELAY_HOURS),
        ),
        Confidence::Good => {
            let level = current_level.saturating_add(1);
            (level, Duration::days(GOOD_DAYS_PER_LEVEL * i64::from(level)))
        }
        Confidence::Easy => {
            let level = current_level.saturating_add(2);
            (level, Duration::days(EASY_DAYS_PER_LEVEL * i64::from(level)))
        }
    };

    let cap = latest_review_at().max(now);
    let next_review_at = now
        .checked_add_signed(delay)
        .map_or(cap, |t| t.min(cap));

    Schedule {
        new_level,
        next_review_at,
    }
}

/// Parses `label` and schedules; nothing is computed for an unknown label.
pub fn schedule_label(
    current_level: u32,
    label: &str,
    now: DateTime<Utc>,
) -> Result<Schedule, InvalidConfidence> {
    let confidence: Confidence = label.parse()?;
    Ok(schedule(current_level, confidence, now))
}

/// Applies one review to `card` and returns the schedule that was written.
pub fn apply_review(card: &mut Flashcard, confidence: Confidence, now: DateTime<Utc>) -> Schedule {
    let s = schedule(card.mastery_level, confidence, now);
    card.mastery_level = s.new_level;
    card.next_review_at = s.next_review_at;
    s
}
