//! Session lifecycle: `start` binds a passage and duration to an owner,
//! `complete` scores the submission and folds it into the owner's records.

use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::records::{self, UserStats};
use crate::session::{AntiCheatSignals, NewSession, Owner, Session, SessionId, TestDuration, UserId};
use crate::store::{self, Database};
use crate::text::{Difficulty, TextProvisioner};

/// What the client sends when a test ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub typed_text: String,
    /// Client-measured typing time; zero or negative values score as zero.
    pub elapsed_secs: f64,
    #[serde(default)]
    pub focus_lost_count: u32,
    #[serde(default)]
    pub suspicious_events: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub session: Session,
    pub is_new_record: bool,
    pub metrics: Metrics,
}

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub struct Engine {
    db: Database,
}

impl Engine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Opens a pending session bound to `reference_text`.
    pub fn start(
        &self,
        owner: Owner,
        duration: TestDuration,
        reference_text: impl Into<String>,
    ) -> Result<Session> {
        let new = NewSession::new(owner, duration, reference_text)?;
        let session = self
            .db
            .transaction(|tx| store::insert_session(tx, new, now()))?;
        info!(
            "started session {} for {} ({}, {} chars)",
            session.id,
            session.owner.kind(),
            session.duration,
            session.reference_text.chars().count()
        );
        Ok(session)
    }

    /// Asks `provisioner` for a passage and opens a session on it.
    pub fn start_with_text(
        &self,
        owner: Owner,
        duration: TestDuration,
        difficulty: Difficulty,
        provisioner: &dyn TextProvisioner,
    ) -> Result<Session> {
        let text = provisioner.select_text(difficulty, duration)?;
        self.start(owner, duration, text)
    }

    /// Scores the submission and moves the session to completed.
    ///
    /// Everything happens in one transaction: the session update, and for
    /// registered users the record check and stats update. On any error the
    /// session stays pending and the stats are untouched.
    pub fn complete(
        &self,
        id: SessionId,
        caller: &Owner,
        submission: Submission,
    ) -> Result<CompletionResult> {
        let now = now();
        let outcome = self.db.transaction(|tx| {
            let mut session = store::get_session(tx, id)?.ok_or(Error::NotFound(id))?;

            let signals = AntiCheatSignals {
                focus_lost_count: submission.focus_lost_count,
                suspicious_events: submission.suspicious_events,
            };
            let metrics = session.complete(
                caller,
                submission.typed_text,
                submission.elapsed_secs,
                signals,
                now,
            )?;

            if !store::save_completion(tx, &session)? {
                return Err(Error::AlreadyCompleted(id));
            }

            let is_new_record = match session.owner.user_id() {
                Some(user) => {
                    let mut stats = store::get_or_create_user_stats(tx, user, now)?;
                    let is_new_record = records::evaluate(&stats, &session);
                    let history = store::completed_scores(tx, user)?;
                    records::apply(&mut stats, &session, &history);
                    store::save_user_stats(tx, &stats)?;
                    is_new_record
                }
                None => false,
            };

            Ok(CompletionResult {
                session,
                is_new_record,
                metrics,
            })
        });

        match &outcome {
            Ok(result) => {
                info!(
                    "completed session {} for {}: {} wpm, {}% accuracy{}",
                    id,
                    result.session.owner.kind(),
                    result.metrics.wpm,
                    result.metrics.accuracy,
                    if result.is_new_record { ", new record" } else { "" }
                );
                if result.session.anti_cheat.focus_lost_count > 0
                    || !result.session.anti_cheat.suspicious_events.is_empty()
                {
                    warn!(
                        "session {} flagged: focus lost {} times, {} suspicious events",
                        id,
                        result.session.anti_cheat.focus_lost_count,
                        result.session.anti_cheat.suspicious_events.len()
                    );
                }
            }
            Err(err) if err.is_internal() => warn!("completing session {id} failed: {err:?}"),
            Err(err) => debug!("rejected completion of session {id}: {err}"),
        }
        outcome
    }

    /// Reads a session on behalf of `caller`.
    pub fn session(&self, id: SessionId, caller: &Owner) -> Result<Session> {
        let session = self
            .db
            .read(|c| store::get_session(c, id))?
            .ok_or(Error::NotFound(id))?;
        session.ensure_owned_by(caller)?;
        Ok(session)
    }

    /// A user's stats, created zeroed if this is the first time they are needed.
    pub fn user_stats(&self, user: UserId) -> Result<UserStats> {
        self.db
            .transaction(|tx| store::get_or_create_user_stats(tx, user, now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GuestToken, SessionState};
    use assert_matches::assert_matches;

    fn engine() -> Engine {
        Engine::new(Database::open_in_memory().unwrap())
    }

    fn submission(typed: &str, elapsed_secs: f64) -> Submission {
        Submission {
            typed_text: typed.to_string(),
            elapsed_secs,
            ..Submission::default()
        }
    }

    struct FixedText(&'static str);

    impl TextProvisioner for FixedText {
        fn select_text(&self, _difficulty: Difficulty, _duration: TestDuration) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn start_rejects_empty_text() {
        let engine = engine();
        let err = engine
            .start(Owner::User(UserId(1)), TestDuration::Thirty, "  ")
            .unwrap_err();
        assert_matches!(err, Error::InvalidInput(_));
    }

    #[test]
    fn start_with_text_uses_provisioner() {
        let engine = engine();
        let session = engine
            .start_with_text(
                Owner::User(UserId(1)),
                TestDuration::Fifteen,
                Difficulty::Easy,
                &FixedText("some passage"),
            )
            .unwrap();
        assert_eq!(session.reference_text, "some passage");
        assert_eq!(session.state, SessionState::Pending);
    }

    #[test]
    fn complete_unknown_session_is_not_found() {
        let engine = engine();
        let err = engine
            .complete(SessionId(99), &Owner::User(UserId(1)), submission("x", 1.0))
            .unwrap_err();
        assert_matches!(err, Error::NotFound(SessionId(99)));
    }

    #[test]
    fn failed_completion_leaves_session_pending() {
        let engine = engine();
        let owner = Owner::Guest(GuestToken::new("tab-1").unwrap());
        let session = engine.start(owner.clone(), TestDuration::Thirty, "abc").unwrap();
        let intruder = Owner::Guest(GuestToken::new("tab-2").unwrap());

        assert_matches!(
            engine.complete(session.id, &intruder, submission("abc", 3.0)),
            Err(Error::Unauthorized)
        );
        assert_matches!(engine.session(session.id, &intruder), Err(Error::Unauthorized));
        let stored = engine.session(session.id, &owner).unwrap();
        assert_eq!(stored, session);
    }

    #[test]
    fn user_completion_updates_stats() {
        let engine = engine();
        let owner = Owner::User(UserId(4));
        let session = engine
            .start(owner.clone(), TestDuration::Sixty, "the quick brown fox")
            .unwrap();
        let result = engine
            .complete(session.id, &owner, submission("the quick brown fox", 12.0))
            .unwrap();

        assert!(result.is_new_record);
        assert_eq!(result.metrics.wpm, 19.0);
        let stats = engine.user_stats(UserId(4)).unwrap();
        assert_eq!(stats.total_tests, 1);
        assert_eq!(stats.best_wpm_for(TestDuration::Sixty), Some(19.0));
        assert_eq!(stats.avg_wpm, 19.0);
        assert_eq!(stats.total_time_typed, 12);
    }
}
