use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use typerank::config::{ConfigStore, FileConfigStore};
use typerank::leaderboard::{self, Period};
use typerank::store::Database;
use typerank::text::{self, CatalogProvisioner, Difficulty, TextProvisioner};
use typerank::{Engine, GuestToken, Owner, SessionId, Submission, TestDuration, UserId};

/// typing test scoring with personal records and leaderboards
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "Starts and completes typing test sessions, scores them (wpm, accuracy), tracks personal records per duration and ranks results on leaderboards."
)]
pub struct Cli {
    /// database file (defaults to the configured or platform location)
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    /// config file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// log debug output to stderr
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// provision a passage for a test
    Text {
        #[clap(short, long, value_enum)]
        difficulty: Option<Difficulty>,
        #[clap(short = 's', long, value_parser = parse_duration, default_value = "30")]
        duration: TestDuration,
    },
    /// start a session bound to a passage
    Start {
        #[clap(flatten)]
        owner: OwnerArgs,
        #[clap(short = 's', long, value_parser = parse_duration)]
        duration: TestDuration,
        /// passage to type; provisioned from the catalog when absent
        #[clap(short, long)]
        text: Option<String>,
        #[clap(short, long, value_enum, conflicts_with = "text")]
        difficulty: Option<Difficulty>,
    },
    /// submit the typed text for a pending session
    Complete {
        session_id: i64,
        #[clap(flatten)]
        owner: OwnerArgs,
        #[clap(long)]
        typed: String,
        /// seconds the attempt took
        #[clap(long, allow_hyphen_values = true)]
        elapsed: f64,
        #[clap(long, default_value_t = 0)]
        focus_lost: u32,
        /// JSON array of suspicious client events
        #[clap(long)]
        events: Option<String>,
    },
    /// show a session
    Show {
        session_id: i64,
        #[clap(flatten)]
        owner: OwnerArgs,
    },
    /// show a user's statistics
    Stats {
        #[clap(long)]
        user: i64,
    },
    /// rank completed sessions for a duration
    Leaderboard {
        #[clap(short = 's', long, value_parser = parse_duration, default_value = "30")]
        duration: TestDuration,
        #[clap(short, long, value_enum, default_value_t = Period::AllTime)]
        period: Period,
        #[clap(short, long)]
        limit: Option<usize>,
    },
    /// import catalog passages from a CSV file (title,difficulty,content)
    ImportTexts { path: PathBuf },
    /// write the effective configuration to the config file
    InitConfig,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct OwnerArgs {
    /// authenticated user id
    #[clap(long)]
    user: Option<i64>,
    /// guest session token
    #[clap(long)]
    guest: Option<String>,
}

impl OwnerArgs {
    fn to_owner(&self) -> Result<Owner> {
        match (self.user, &self.guest) {
            (Some(id), None) => Ok(Owner::User(UserId(id))),
            (None, Some(token)) => Ok(Owner::Guest(GuestToken::new(token.clone())?)),
            _ => anyhow::bail!("exactly one of --user or --guest is required"),
        }
    }
}

fn parse_duration(s: &str) -> Result<TestDuration, typerank::Error> {
    s.parse()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };
    let config = store.load();

    if let Command::InitConfig = cli.command {
        store
            .save(&config)
            .with_context(|| format!("writing config {}", store.path().display()))?;
        return print_json(&json!({ "config_path": store.path(), "config": config }));
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.resolve_db_path());
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let engine = Engine::new(db);

    match cli.command {
        Command::Text {
            difficulty,
            duration,
        } => {
            let difficulty = difficulty.unwrap_or(config.default_difficulty);
            let passage = CatalogProvisioner::new(engine.db()).select_text(difficulty, duration)?;
            print_json(&json!({
                "text": passage,
                "word_count": passage.split_whitespace().count(),
                "character_count": passage.chars().count(),
                "difficulty": difficulty,
                "duration": duration,
            }))
        }
        Command::Start {
            owner,
            duration,
            text,
            difficulty,
        } => {
            let owner = owner.to_owner()?;
            let session = match text {
                Some(text) => engine.start(owner, duration, text)?,
                None => {
                    let difficulty = difficulty.unwrap_or(config.default_difficulty);
                    let provisioner = CatalogProvisioner::new(engine.db());
                    engine.start_with_text(owner, duration, difficulty, &provisioner)?
                }
            };
            print_json(&json!({
                "session_id": session.id,
                "reference_text": session.reference_text,
                "duration": session.duration,
                "started_at": session.started_at,
            }))
        }
        Command::Complete {
            session_id,
            owner,
            typed,
            elapsed,
            focus_lost,
            events,
        } => {
            let owner = owner.to_owner()?;
            let suspicious_events = match events {
                Some(raw) => serde_json::from_str::<Vec<serde_json::Value>>(&raw)
                    .context("--events must be a JSON array")?,
                None => Vec::new(),
            };
            let submission = Submission {
                typed_text: typed,
                elapsed_secs: elapsed,
                focus_lost_count: focus_lost,
                suspicious_events,
            };
            let result = engine.complete(SessionId(session_id), &owner, submission)?;
            print_json(&result)
        }
        Command::Show { session_id, owner } => {
            let owner = owner.to_owner()?;
            print_json(&engine.session(SessionId(session_id), &owner)?)
        }
        Command::Stats { user } => print_json(&engine.user_stats(UserId(user))?),
        Command::Leaderboard {
            duration,
            period,
            limit,
        } => {
            let entries = leaderboard::leaderboard(
                engine.db(),
                duration,
                period,
                limit.unwrap_or(config.leaderboard_limit),
                config.max_plausible_wpm,
            )?;
            print_json(&json!({
                "duration": duration,
                "period": period,
                "leaderboard": entries,
            }))
        }
        Command::ImportTexts { path } => {
            let file = File::open(&path).with_context(|| format!("reading {}", path.display()))?;
            let count = text::import_csv(engine.db(), file)?;
            print_json(&json!({ "imported": count }))
        }
        // handled before the database is opened
        Command::InitConfig => Ok(()),
    }
}
