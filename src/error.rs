use thiserror::Error;

use crate::session::SessionId;

/// Failures surfaced by the session lifecycle and its persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request, bad enumerated value or empty required field.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No session with this id is visible to the caller.
    #[error("session {0} not found")]
    NotFound(SessionId),
    /// The session exists but belongs to another principal.
    #[error("unauthorized")]
    Unauthorized,
    /// The session has already left the pending state.
    #[error("session {0} is already completed")]
    AlreadyCompleted(SessionId),
    /// Storage or serialization fault. Detail stays in the source.
    #[error("internal failure")]
    Storage(#[from] rusqlite::Error),
    #[error("internal failure")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for persistence and infrastructure faults.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Serialization(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
