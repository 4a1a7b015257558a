//! SQLite persistence for sessions, user statistics and the text catalog.
//!
//! All access goes through one connection behind a mutex. Writes that must be
//! atomic run inside [`Database::transaction`], which takes an immediate
//! (write) lock up front, so read-modify-write sequences on a session or a
//! user's stats never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::records::{ScoreSample, UserStats};
use crate::session::{
    AntiCheatSignals, GuestToken, NewSession, Owner, Session, SessionId, SessionState,
    TestDuration, UserId,
};
use crate::text::{Difficulty, NewText, TextContent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    guest_token TEXT,
    duration INTEGER NOT NULL CHECK (duration IN (15, 30, 60)),
    reference_text TEXT NOT NULL,
    typed_text TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'pending',
    wpm REAL NOT NULL DEFAULT 0,
    raw_wpm REAL NOT NULL DEFAULT 0,
    accuracy REAL NOT NULL DEFAULT 0,
    correct_chars INTEGER NOT NULL DEFAULT 0,
    incorrect_chars INTEGER NOT NULL DEFAULT 0,
    total_chars INTEGER NOT NULL DEFAULT 0,
    typing_time REAL NOT NULL DEFAULT 0,
    focus_lost_count INTEGER NOT NULL DEFAULT 0,
    suspicious_events TEXT NOT NULL DEFAULT '[]',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    CHECK ((user_id IS NULL) <> (guest_token IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_sessions_user_started ON sessions(user_id, started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_duration_wpm ON sessions(duration, wpm);
CREATE INDEX IF NOT EXISTS idx_sessions_guest ON sessions(guest_token);
CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state, started_at);

CREATE TABLE IF NOT EXISTS user_stats (
    user_id INTEGER PRIMARY KEY,
    total_tests INTEGER NOT NULL DEFAULT 0,
    completed_tests INTEGER NOT NULL DEFAULT 0,
    completion_rate REAL NOT NULL DEFAULT 0,
    avg_wpm REAL NOT NULL DEFAULT 0,
    avg_accuracy REAL NOT NULL DEFAULT 0,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    total_time_typed INTEGER NOT NULL DEFAULT 0,
    last_test_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS personal_bests (
    user_id INTEGER NOT NULL REFERENCES user_stats(user_id) ON DELETE CASCADE,
    duration INTEGER NOT NULL CHECK (duration IN (15, 30, 60)),
    best_wpm REAL,
    best_accuracy REAL,
    PRIMARY KEY (user_id, duration)
);

CREATE TABLE IF NOT EXISTS text_content (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'common_words',
    language TEXT NOT NULL DEFAULT 'en',
    word_count INTEGER NOT NULL,
    character_count INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_text_content_difficulty ON text_content(difficulty, is_active);
"#;

const SESSION_COLUMNS: &str = "id, user_id, guest_token, duration, reference_text, typed_text, state, \
     wpm, raw_wpm, accuracy, correct_chars, incorrect_chars, total_chars, typing_time, \
     focus_lost_count, suspicious_events, started_at, completed_at";

/// Database handle shared by the engine, text provisioner and leaderboard.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if needed) the database at `path`, including parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }
        debug!("opening database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` in an immediate transaction; commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs a read-only closure against the connection.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_datetime(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_datetime(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_datetime(idx, &v)).transpose()
}

fn parse_duration(idx: usize, secs: u32) -> rusqlite::Result<TestDuration> {
    TestDuration::try_from(secs).map_err(|e| conversion_error(idx, e))
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let user_id: Option<i64> = row.get("user_id")?;
    let guest_token: Option<String> = row.get("guest_token")?;
    let owner = match (user_id, guest_token) {
        (Some(id), None) => Owner::User(UserId(id)),
        (None, Some(token)) => {
            Owner::Guest(GuestToken::new(token).map_err(|e| conversion_error(2, e))?)
        }
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "user_id".to_string(),
                Type::Null,
            ))
        }
    };

    let state: String = row.get("state")?;
    let events: String = row.get("suspicious_events")?;
    let started_at: String = row.get("started_at")?;

    Ok(Session {
        id: SessionId(row.get("id")?),
        owner,
        duration: parse_duration(3, row.get("duration")?)?,
        reference_text: row.get("reference_text")?,
        typed_text: row.get("typed_text")?,
        state: state.parse::<SessionState>().map_err(|e| conversion_error(6, e))?,
        metrics: Metrics {
            wpm: row.get("wpm")?,
            raw_wpm: row.get("raw_wpm")?,
            accuracy: row.get("accuracy")?,
            correct_chars: row.get("correct_chars")?,
            incorrect_chars: row.get("incorrect_chars")?,
            total_chars: row.get("total_chars")?,
        },
        typing_time: row.get("typing_time")?,
        started_at: parse_datetime(16, &started_at)?,
        completed_at: parse_optional_datetime(17, row.get("completed_at")?)?,
        anti_cheat: AntiCheatSignals {
            focus_lost_count: row.get("focus_lost_count")?,
            suspicious_events: serde_json::from_str(&events).map_err(|e| conversion_error(15, e))?,
        },
    })
}

/// Persists a new pending session and returns it with its assigned id.
pub fn insert_session(conn: &Connection, new: NewSession, started_at: DateTime<Utc>) -> Result<Session> {
    conn.execute(
        "INSERT INTO sessions (user_id, guest_token, duration, reference_text, state, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.owner.user_id().map(|u| u.0),
            new.owner.guest_token().map(GuestToken::as_str),
            new.duration.secs(),
            new.reference_text,
            SessionState::Pending.as_str(),
            timestamp(&started_at),
        ],
    )?;
    let id = SessionId(conn.last_insert_rowid());
    Ok(Session::pending(id, new, started_at))
}

pub fn get_session(conn: &Connection, id: SessionId) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    let session = conn
        .query_row(&sql, [id.0], row_to_session)
        .optional()?;
    Ok(session)
}

/// Writes the completion fields of `session`, but only if the stored row is
/// still pending. Returns false when another completion got there first.
pub fn save_completion(conn: &Connection, session: &Session) -> Result<bool> {
    let events = serde_json::to_string(&session.anti_cheat.suspicious_events)?;
    let changed = conn.execute(
        "UPDATE sessions
         SET typed_text = ?1,
             state = ?2,
             wpm = ?3,
             raw_wpm = ?4,
             accuracy = ?5,
             correct_chars = ?6,
             incorrect_chars = ?7,
             total_chars = ?8,
             typing_time = ?9,
             focus_lost_count = ?10,
             suspicious_events = ?11,
             completed_at = ?12
         WHERE id = ?13 AND state = ?14",
        params![
            session.typed_text,
            SessionState::Completed.as_str(),
            session.metrics.wpm,
            session.metrics.raw_wpm,
            session.metrics.accuracy,
            session.metrics.correct_chars,
            session.metrics.incorrect_chars,
            session.metrics.total_chars,
            session.typing_time,
            session.anti_cheat.focus_lost_count,
            events,
            session.completed_at.as_ref().map(timestamp),
            session.id.0,
            SessionState::Pending.as_str(),
        ],
    )?;
    Ok(changed == 1)
}

/// Scores of every completed session owned by `user`, oldest first.
pub fn completed_scores(conn: &Connection, user: UserId) -> Result<Vec<ScoreSample>> {
    let mut stmt = conn.prepare(
        "SELECT wpm, accuracy FROM sessions
         WHERE user_id = ?1 AND state = 'completed'
         ORDER BY completed_at",
    )?;
    let rows = stmt.query_map([user.0], |row| {
        Ok(ScoreSample {
            wpm: row.get(0)?,
            accuracy: row.get(1)?,
        })
    })?;

    let mut samples = Vec::new();
    for sample in rows {
        samples.push(sample?);
    }
    Ok(samples)
}

/// Completed sessions for one duration started at or after `since`, best wpm
/// first. Sessions above `max_wpm` or outside 0-100% accuracy are skipped
/// before the limit applies.
pub fn top_sessions(
    conn: &Connection,
    duration: TestDuration,
    since: Option<DateTime<Utc>>,
    max_wpm: f64,
    limit: usize,
) -> Result<Vec<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE state = 'completed' AND duration = ?1 AND started_at >= ?2
           AND wpm BETWEEN 0 AND ?3
           AND accuracy BETWEEN 0 AND 100
         ORDER BY wpm DESC, completed_at ASC
         LIMIT ?4"
    );
    let since = since.as_ref().map(timestamp).unwrap_or_default();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![duration.secs(), since, max_wpm, limit],
        row_to_session,
    )?;

    let mut sessions = Vec::new();
    for session in rows {
        sessions.push(session?);
    }
    Ok(sessions)
}

pub fn load_user_stats(conn: &Connection, user: UserId) -> Result<Option<UserStats>> {
    let stats = conn
        .query_row(
            "SELECT user_id, total_tests, completed_tests, completion_rate, avg_wpm, avg_accuracy,
                    current_streak, longest_streak, total_time_typed, last_test_at, updated_at
             FROM user_stats WHERE user_id = ?1",
            [user.0],
            |row| {
                let updated_at: String = row.get("updated_at")?;
                let total_time_typed: i64 = row.get("total_time_typed")?;
                Ok(UserStats {
                    user_id: UserId(row.get("user_id")?),
                    total_tests: row.get("total_tests")?,
                    completed_tests: row.get("completed_tests")?,
                    completion_rate: row.get("completion_rate")?,
                    best_wpm: Default::default(),
                    best_accuracy: Default::default(),
                    avg_wpm: row.get("avg_wpm")?,
                    avg_accuracy: row.get("avg_accuracy")?,
                    current_streak: row.get("current_streak")?,
                    longest_streak: row.get("longest_streak")?,
                    total_time_typed: u64::try_from(total_time_typed).unwrap_or(0),
                    last_test_at: parse_optional_datetime(9, row.get("last_test_at")?)?,
                    updated_at: parse_datetime(10, &updated_at)?,
                })
            },
        )
        .optional()?;

    let Some(mut stats) = stats else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT duration, best_wpm, best_accuracy FROM personal_bests WHERE user_id = ?1",
    )?;
    let mut rows = stmt.query([user.0])?;
    while let Some(row) = rows.next()? {
        let duration = parse_duration(0, row.get(0)?)?;
        if let Some(wpm) = row.get::<_, Option<f64>>(1)? {
            stats.best_wpm.insert(duration, wpm);
        }
        if let Some(accuracy) = row.get::<_, Option<f64>>(2)? {
            stats.best_accuracy.insert(duration, accuracy);
        }
    }

    Ok(Some(stats))
}

/// Loads a user's stats, creating a zeroed row on first access.
pub fn get_or_create_user_stats(conn: &Connection, user: UserId, now: DateTime<Utc>) -> Result<UserStats> {
    if let Some(stats) = load_user_stats(conn, user)? {
        return Ok(stats);
    }
    debug!("creating stats for user {user}");
    let stats = UserStats::new(user, now);
    save_user_stats(conn, &stats)?;
    Ok(stats)
}

pub fn save_user_stats(conn: &Connection, stats: &UserStats) -> Result<()> {
    conn.execute(
        "INSERT INTO user_stats
            (user_id, total_tests, completed_tests, completion_rate, avg_wpm, avg_accuracy,
             current_streak, longest_streak, total_time_typed, last_test_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(user_id) DO UPDATE SET
             total_tests = excluded.total_tests,
             completed_tests = excluded.completed_tests,
             completion_rate = excluded.completion_rate,
             avg_wpm = excluded.avg_wpm,
             avg_accuracy = excluded.avg_accuracy,
             current_streak = excluded.current_streak,
             longest_streak = excluded.longest_streak,
             total_time_typed = excluded.total_time_typed,
             last_test_at = excluded.last_test_at,
             updated_at = excluded.updated_at",
        params![
            stats.user_id.0,
            stats.total_tests,
            stats.completed_tests,
            stats.completion_rate,
            stats.avg_wpm,
            stats.avg_accuracy,
            stats.current_streak,
            stats.longest_streak,
            i64::try_from(stats.total_time_typed).unwrap_or(i64::MAX),
            stats.last_test_at.as_ref().map(timestamp),
            timestamp(&stats.updated_at),
        ],
    )?;

    for duration in TestDuration::ALL {
        let wpm = stats.best_wpm_for(duration);
        let accuracy = stats.best_accuracy_for(duration);
        if wpm.is_none() && accuracy.is_none() {
            continue;
        }
        conn.execute(
            "INSERT INTO personal_bests (user_id, duration, best_wpm, best_accuracy)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, duration) DO UPDATE SET
                 best_wpm = excluded.best_wpm,
                 best_accuracy = excluded.best_accuracy",
            params![stats.user_id.0, duration.secs(), wpm, accuracy],
        )?;
    }
    Ok(())
}

/// Removes a user's stats and personal bests. Sessions are kept.
pub fn delete_user_stats(conn: &Connection, user: UserId) -> Result<bool> {
    let changed = conn.execute("DELETE FROM user_stats WHERE user_id = ?1", [user.0])?;
    Ok(changed > 0)
}

pub fn add_text(conn: &Connection, text: &NewText, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO text_content
            (title, content, difficulty, category, language, word_count, character_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            text.title,
            text.content,
            text.difficulty.as_str(),
            text.category,
            text.language,
            text.word_count(),
            text.character_count(),
            timestamp(&now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A random active catalog text of the given difficulty.
pub fn random_text(conn: &Connection, difficulty: Difficulty) -> Result<Option<TextContent>> {
    let text = conn
        .query_row(
            "SELECT id, title, content, difficulty, category, language, word_count, character_count, is_active
             FROM text_content
             WHERE difficulty = ?1 AND is_active = 1
             ORDER BY RANDOM()
             LIMIT 1",
            [difficulty.as_str()],
            |row| {
                let difficulty: String = row.get("difficulty")?;
                Ok(TextContent {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    content: row.get("content")?,
                    difficulty: difficulty.parse().map_err(|e| conversion_error(3, e))?,
                    category: row.get("category")?,
                    language: row.get("language")?,
                    word_count: row.get("word_count")?,
                    character_count: row.get("character_count")?,
                    is_active: row.get("is_active")?,
                })
            },
        )
        .optional()?;
    Ok(text)
}

pub fn set_text_active(conn: &Connection, id: i64, active: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE text_content SET is_active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    Ok(changed > 0)
}
