use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{self, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable per-browser-session identifier for unauthenticated attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuestToken(String);

impl GuestToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::invalid("guest token must not be empty"));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, safe for display and logs.
    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl TryFrom<String> for GuestToken {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GuestToken> for String {
    fn from(token: GuestToken) -> Self {
        token.0
    }
}

/// The principal a session belongs to: exactly one of a registered user or a guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    User(UserId),
    Guest(GuestToken),
}

impl Owner {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Guest(_) => None,
        }
    }

    pub fn guest_token(&self) -> Option<&GuestToken> {
        match self {
            Owner::User(_) => None,
            Owner::Guest(token) => Some(token),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Owner::User(_) => "user",
            Owner::Guest(_) => "guest",
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Owner::User(id) => format!("user-{id}"),
            Owner::Guest(token) => format!("Guest-{}", token.short()),
        }
    }
}

/// Allowed test lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TestDuration {
    Fifteen,
    Thirty,
    Sixty,
}

impl TestDuration {
    pub const ALL: [TestDuration; 3] = [
        TestDuration::Fifteen,
        TestDuration::Thirty,
        TestDuration::Sixty,
    ];

    pub fn secs(self) -> u32 {
        match self {
            TestDuration::Fifteen => 15,
            TestDuration::Thirty => 30,
            TestDuration::Sixty => 60,
        }
    }
}

impl TryFrom<u32> for TestDuration {
    type Error = Error;

    fn try_from(secs: u32) -> Result<Self> {
        match secs {
            15 => Ok(TestDuration::Fifteen),
            30 => Ok(TestDuration::Thirty),
            60 => Ok(TestDuration::Sixty),
            other => Err(Error::invalid(format!(
                "duration must be one of 15, 30, 60 seconds, got {other}"
            ))),
        }
    }
}

impl From<TestDuration> for u32 {
    fn from(d: TestDuration) -> Self {
        d.secs()
    }
}

impl FromStr for TestDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().trim_end_matches('s');
        let secs = digits
            .parse::<u32>()
            .map_err(|_| Error::invalid(format!("duration must be a number of seconds, got {s:?}")))?;
        TestDuration::try_from(secs)
    }
}

impl fmt::Display for TestDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.secs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Completed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Completed => "completed",
        }
    }
}

impl FromStr for SessionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionState::Pending),
            "completed" => Ok(SessionState::Completed),
            other => Err(Error::invalid(format!("unknown session state '{other}'"))),
        }
    }
}

/// Client-reported signals captured once, at completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntiCheatSignals {
    pub focus_lost_count: u32,
    /// Opaque event records, kept in submission order.
    pub suspicious_events: Vec<serde_json::Value>,
}

/// A validated request to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub owner: Owner,
    pub duration: TestDuration,
    pub reference_text: String,
}

impl NewSession {
    pub fn new(owner: Owner, duration: TestDuration, reference_text: impl Into<String>) -> Result<Self> {
        let reference_text = reference_text.into();
        if reference_text.trim().is_empty() {
            return Err(Error::invalid("reference text must not be empty"));
        }
        Ok(Self {
            owner,
            duration,
            reference_text,
        })
    }
}

/// One typing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: Owner,
    pub duration: TestDuration,
    /// Snapshot of the passage shown at start; scoring always uses this.
    pub reference_text: String,
    pub typed_text: String,
    pub state: SessionState,
    pub metrics: Metrics,
    /// Elapsed seconds reported at completion.
    pub typing_time: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub anti_cheat: AntiCheatSignals,
}

impl Session {
    pub fn pending(id: SessionId, new: NewSession, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: new.owner,
            duration: new.duration,
            reference_text: new.reference_text,
            typed_text: String::new(),
            state: SessionState::Pending,
            metrics: Metrics::zero(),
            typing_time: 0.0,
            started_at,
            completed_at: None,
            anti_cheat: AntiCheatSignals::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Fails with `Unauthorized` unless `caller` is the recorded owner.
    pub fn ensure_owned_by(&self, caller: &Owner) -> Result<()> {
        if &self.owner == caller {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    /// Pending -> Completed. Scores `typed_text` against the stored reference
    /// text; duration and reference text are left untouched. An unscorable
    /// elapsed time is recorded as zero typing time.
    pub fn complete(
        &mut self,
        caller: &Owner,
        typed_text: String,
        elapsed_secs: f64,
        signals: AntiCheatSignals,
        now: DateTime<Utc>,
    ) -> Result<Metrics> {
        self.ensure_owned_by(caller)?;
        if self.is_completed() {
            return Err(Error::AlreadyCompleted(self.id));
        }

        let metrics = metrics::compute(&self.reference_text, &typed_text, elapsed_secs);

        self.typed_text = typed_text;
        self.metrics = metrics;
        self.typing_time = if metrics::is_scorable_elapsed(elapsed_secs) {
            elapsed_secs
        } else {
            0.0
        };
        self.anti_cheat = signals;
        self.state = SessionState::Completed;
        self.completed_at = Some(now);

        Ok(metrics)
    }
}
