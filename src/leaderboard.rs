use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{SessionId, TestDuration};
use crate::store::{self, Database};
use crate::util::round2;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_PLAUSIBLE_WPM: f64 = 300.0;

const WPM_WEIGHT: f64 = 0.7;
const ACCURACY_WEIGHT: f64 = 0.3;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    #[default]
    AllTime,
}

impl Period {
    /// Earliest start time included in the period, or `None` for all time.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Period::Daily => 1,
            Period::Weekly => 7,
            Period::Monthly => 30,
            Period::AllTime => return None,
        };
        Some(now - Duration::days(days))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub session_id: SessionId,
    pub wpm: f64,
    pub accuracy: f64,
    pub score: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Weighted score used for ranking: 70% wpm, 30% accuracy.
pub fn composite_score(wpm: f64, accuracy: f64) -> f64 {
    round2(wpm * WPM_WEIGHT + accuracy * ACCURACY_WEIGHT)
}

/// The top `limit` sessions by wpm for `duration` within `period`, ranked by
/// composite score. Scores above `max_wpm` never take a place on the board.
pub fn leaderboard(
    db: &Database,
    duration: TestDuration,
    period: Period,
    limit: usize,
    max_wpm: f64,
) -> Result<Vec<LeaderboardEntry>> {
    let since = period.since(Utc::now());
    let sessions = db.read(|c| store::top_sessions(c, duration, since, max_wpm, limit))?;

    let entries = sessions
        .into_iter()
        .map(|s| {
            let score = composite_score(s.metrics.wpm, s.metrics.accuracy);
            (s, score)
        })
        .sorted_by(|a, b| b.1.total_cmp(&a.1))
        .enumerate()
        .map(|(i, (s, score))| LeaderboardEntry {
            rank: i + 1,
            name: s.owner.display_name(),
            session_id: s.id,
            wpm: s.metrics.wpm,
            accuracy: s.metrics.accuracy,
            score,
            completed_at: s.completed_at,
        })
        .collect();
    Ok(entries)
}
