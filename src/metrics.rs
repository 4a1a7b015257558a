use serde::{Deserialize, Serialize};

use crate::util::round2;

/// Characters per standard word.
pub const CHARS_PER_WORD: f64 = 5.0;

/// Score of one typing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Accuracy-penalised words per minute; used for ranking and records.
    pub wpm: f64,
    pub raw_wpm: f64,
    /// Percentage of the reference text reproduced correctly.
    pub accuracy: f64,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub total_chars: u32,
}

impl Metrics {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// True for an elapsed time that can be scored: finite and strictly positive.
pub fn is_scorable_elapsed(elapsed_secs: f64) -> bool {
    elapsed_secs.is_finite() && elapsed_secs > 0.0
}

/// Scores `typed` against `reference` over `elapsed_secs`.
///
/// Total over its input domain: an elapsed time that is not finite and
/// strictly positive yields all-zero metrics. Characters are compared position by position;
/// missing trailing characters count as incorrect, excess typed characters
/// only contribute to `total_chars`. Accuracy is measured against the
/// reference length and wpm is raw wpm scaled by accuracy.
pub fn compute(reference: &str, typed: &str, elapsed_secs: f64) -> Metrics {
    if !is_scorable_elapsed(elapsed_secs) {
        return Metrics::zero();
    }

    let reference_len = reference.chars().count();
    let typed_len = typed.chars().count();

    let (correct, mismatched) = reference
        .chars()
        .zip(typed.chars())
        .fold((0usize, 0usize), |(ok, bad), (expected, actual)| {
            if expected == actual {
                (ok + 1, bad)
            } else {
                (ok, bad + 1)
            }
        });

    let missing = reference_len.saturating_sub(typed_len);
    let incorrect = mismatched + missing;

    let accuracy = if reference_len > 0 {
        correct as f64 / reference_len as f64 * 100.0
    } else {
        0.0
    };

    let raw_wpm = (typed_len as f64 / CHARS_PER_WORD) / (elapsed_secs / 60.0);
    let wpm = raw_wpm * (accuracy / 100.0);

    Metrics {
        wpm: round2(wpm),
        raw_wpm: round2(raw_wpm),
        accuracy: round2(accuracy),
        correct_chars: saturate(correct),
        incorrect_chars: saturate(incorrect),
        total_chars: saturate(typed_len),
    }
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
