//! Personal records and aggregate statistics for registered users.
//!
//! `evaluate` must see the stats as they were before the session being
//! recorded; `apply` then folds that session in. The engine runs both inside
//! the completion transaction, so the pair is serialised per user.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Session, TestDuration, UserId};
use crate::util::mean;

/// Upper bound for `total_time_typed`; the store keeps it in a signed 64-bit column.
pub const MAX_TOTAL_TIME_TYPED: u64 = i64::MAX as u64;

/// Aggregates for one registered user. Created zeroed on first need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: UserId,
    pub total_tests: u32,
    pub completed_tests: u32,
    /// Percentage of started tests that were completed.
    pub completion_rate: f64,
    pub best_wpm: BTreeMap<TestDuration, f64>,
    pub best_accuracy: BTreeMap<TestDuration, f64>,
    pub avg_wpm: f64,
    pub avg_accuracy: f64,
    /// Consecutive UTC calendar days with at least one completed test.
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Whole seconds spent typing.
    pub total_time_typed: u64,
    pub last_test_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserStats {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_tests: 0,
            completed_tests: 0,
            completion_rate: 0.0,
            best_wpm: BTreeMap::new(),
            best_accuracy: BTreeMap::new(),
            avg_wpm: 0.0,
            avg_accuracy: 0.0,
            current_streak: 0,
            longest_streak: 0,
            total_time_typed: 0,
            last_test_at: None,
            updated_at: now,
        }
    }

    pub fn best_wpm_for(&self, duration: TestDuration) -> Option<f64> {
        self.best_wpm.get(&duration).copied()
    }

    pub fn best_accuracy_for(&self, duration: TestDuration) -> Option<f64> {
        self.best_accuracy.get(&duration).copied()
    }
}

/// The wpm and accuracy of one completed session, as read from history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSample {
    pub wpm: f64,
    pub accuracy: f64,
}

/// True iff the session beats the stored best wpm for its duration.
/// With no best recorded yet, any completed session is a record.
pub fn evaluate(stats: &UserStats, session: &Session) -> bool {
    match stats.best_wpm_for(session.duration) {
        Some(best) => session.metrics.wpm > best,
        None => true,
    }
}

/// Folds a completed session into `stats`.
///
/// `history` is every completed session of the user, this one included; the
/// averages are recomputed from it in full.
pub fn apply(stats: &mut UserStats, session: &Session, history: &[ScoreSample]) {
    stats.total_tests += 1;
    stats.completed_tests += 1;

    let wpm = session.metrics.wpm;
    let accuracy = session.metrics.accuracy;
    raise(&mut stats.best_wpm, session.duration, wpm);
    raise(&mut stats.best_accuracy, session.duration, accuracy);

    let wpms: Vec<f64> = history.iter().map(|s| s.wpm).collect();
    let accuracies: Vec<f64> = history.iter().map(|s| s.accuracy).collect();
    stats.avg_wpm = mean(&wpms).unwrap_or(0.0);
    stats.avg_accuracy = mean(&accuracies).unwrap_or(0.0);

    // float to int casts saturate, NaN becomes 0
    let secs = session.typing_time.max(0.0).floor() as u64;
    stats.total_time_typed = stats
        .total_time_typed
        .saturating_add(secs)
        .min(MAX_TOTAL_TIME_TYPED);

    if let Some(completed_at) = session.completed_at {
        update_streak(stats, completed_at);
        stats.last_test_at = Some(completed_at);
        stats.updated_at = completed_at;
    }

    stats.completion_rate = if stats.total_tests > 0 {
        stats.completed_tests as f64 / stats.total_tests as f64 * 100.0
    } else {
        0.0
    };
}

fn raise(bests: &mut BTreeMap<TestDuration, f64>, duration: TestDuration, value: f64) {
    bests
        .entry(duration)
        .and_modify(|best| {
            if value > *best {
                *best = value;
            }
        })
        .or_insert(value);
}

fn update_streak(stats: &mut UserStats, completed_at: DateTime<Utc>) {
    let today = completed_at.date_naive();
    stats.current_streak = match stats.last_test_at.map(|t| t.date_naive()) {
        Some(last) if last == today => stats.current_streak.max(1),
        Some(last) if last + Duration::days(1) == today => stats.current_streak + 1,
        _ => 1,
    };
    stats.longest_streak = stats.longest_streak.max(stats.current_streak);
}
