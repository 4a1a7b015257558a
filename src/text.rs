use std::io;
use std::str::FromStr;

use chrono::Utc;
use clap::ValueEnum;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::TestDuration;
use crate::store::{self, Database};

/// Roughly two words per second of test time.
const WORDS_PER_SECOND: usize = 2;
const MIN_FALLBACK_WORDS: usize = 20;

const EASY_WORDS: &[&str] = &[
    "the", "and", "for", "you", "are", "with", "this", "that", "have", "from", "they", "know",
    "want", "been", "good", "much", "some", "time", "very", "when",
];

const MEDIUM_WORDS: &[&str] = &[
    "people", "about", "would", "could", "there", "their", "think", "where", "being", "right",
    "before", "after", "should", "through", "during", "follow", "around", "between", "without",
    "something",
];

const HARD_WORDS: &[&str] = &[
    "government", "development", "management", "information", "environment", "community",
    "university", "technology", "opportunity", "experience", "achievement", "responsibility",
    "understanding", "communication", "organization", "relationship", "professional",
    "international", "contemporary", "perspective",
];

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }

    fn word_list(self) -> &'static [&'static str] {
        match self {
            Difficulty::Easy => EASY_WORDS,
            Difficulty::Medium => MEDIUM_WORDS,
            Difficulty::Hard | Difficulty::Expert => HARD_WORDS,
        }
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "expert" => Ok(Difficulty::Expert),
            other => Err(Error::invalid(format!("unknown difficulty '{other}'"))),
        }
    }
}

/// A passage in the text catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub language: String,
    pub word_count: u32,
    pub character_count: u32,
    pub is_active: bool,
}

/// A passage to be added to the catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewText {
    pub title: String,
    pub content: String,
    pub difficulty: Difficulty,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_category() -> String {
    "common_words".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl NewText {
    pub fn new(title: impl Into<String>, content: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            difficulty,
            category: default_category(),
            language: default_language(),
        }
    }

    pub fn word_count(&self) -> u32 {
        u32::try_from(self.content.split_whitespace().count()).unwrap_or(u32::MAX)
    }

    pub fn character_count(&self) -> u32 {
        u32::try_from(self.content.chars().count()).unwrap_or(u32::MAX)
    }
}

/// Source of the passage a session is bound to.
pub trait TextProvisioner {
    fn select_text(&self, difficulty: Difficulty, duration: TestDuration) -> Result<String>;
}

/// Picks a random catalog passage, falling back to generated words when the
/// catalog has nothing for the requested difficulty.
pub struct CatalogProvisioner<'a> {
    db: &'a Database,
}

impl<'a> CatalogProvisioner<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

impl TextProvisioner for CatalogProvisioner<'_> {
    fn select_text(&self, difficulty: Difficulty, duration: TestDuration) -> Result<String> {
        match self.db.read(|c| store::random_text(c, difficulty))? {
            Some(text) => {
                debug!("selected catalog text {} ({})", text.id, text.title);
                Ok(trim_to_words(&text.content, target_words(duration)))
            }
            None => {
                debug!("no active {difficulty} texts, generating fallback");
                Ok(fallback_text(difficulty, duration, &mut rand::thread_rng()))
            }
        }
    }
}

pub fn target_words(duration: TestDuration) -> usize {
    duration.secs() as usize * WORDS_PER_SECOND
}

/// Keeps at most `max_words` whitespace-separated words.
pub fn trim_to_words(content: &str, max_words: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() > max_words {
        words[..max_words].join(" ")
    } else {
        content.to_string()
    }
}

/// Random words from the built-in list for `difficulty`.
pub fn fallback_text<R: Rng + ?Sized>(difficulty: Difficulty, duration: TestDuration, rng: &mut R) -> String {
    let words = difficulty.word_list();
    let count = target_words(duration).max(MIN_FALLBACK_WORDS);
    (0..count)
        .filter_map(|_| words.choose(rng).copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Imports catalog passages from CSV with a `title,difficulty,content` header
/// (optional `category` and `language` columns). Returns the number imported.
pub fn import_csv<R: io::Read>(db: &Database, reader: R) -> Result<usize> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut texts = Vec::new();
    for (line, record) in rdr.deserialize::<NewText>().enumerate() {
        let text = record.map_err(|e| Error::invalid(format!("csv record {}: {e}", line + 1)))?;
        if text.content.trim().is_empty() {
            return Err(Error::invalid(format!("csv record {}: empty content", line + 1)));
        }
        texts.push(text);
    }

    let now = Utc::now();
    let count = db.transaction(|tx| {
        for text in &texts {
            store::add_text(tx, text, now)?;
        }
        Ok(texts.len())
    })?;
    info!("imported {count} texts");
    Ok(count)
}
