use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::leaderboard::{DEFAULT_LIMIT, MAX_PLAUSIBLE_WPM};
use crate::text::Difficulty;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Overrides the platform database location.
    pub database_path: Option<PathBuf>,
    pub default_difficulty: Difficulty,
    pub leaderboard_limit: usize,
    /// Scores above this are left off leaderboards.
    pub max_plausible_wpm: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            default_difficulty: Difficulty::Medium,
            leaderboard_limit: DEFAULT_LIMIT,
            max_plausible_wpm: MAX_PLAUSIBLE_WPM,
        }
    }
}

impl Config {
    /// Configured database path, else the platform default, else the working directory.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .or_else(AppDirs::db_path)
            .unwrap_or_else(|| PathBuf::from("typerank.db"))
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("ignoring malformed config {}: {err}", self.path.display());
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).map_err(std::io::Error::from)?;
        fs::write(&self.path, data)
    }
}
