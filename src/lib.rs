// Library surface shared by the CLI and the integration tests.
pub mod app_dirs;
pub mod config;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod metrics;
pub mod rate_limit;
pub mod records;
pub mod session;
pub mod store;
pub mod text;
pub mod util;

pub use engine::{CompletionResult, Engine, Submission};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use session::{GuestToken, Owner, Session, SessionId, SessionState, TestDuration, UserId};
