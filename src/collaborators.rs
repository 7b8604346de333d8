use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use kirinuki_image::CutProgress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stopwatch::format_clock;

pub const HIGH_SCORE_LIMIT: usize = 10;
pub const HIGH_SCORES_FILE: &str = "high_scores.json";
pub const UNLOCKED_PICTURES_FILE: &str = "unlocked_pictures.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io failed: {0}")]
    Io(#[from] io::Error),
    #[error("ledger is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of a finished puzzle, as handed to the gallery and the leaderboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameOver {
    /// Set only for bundled pictures; captured ones never enter the gallery.
    pub image_id: Option<String>,
    pub elapsed_seconds: u64,
    pub difficulty_key: String,
}

impl GameOver {
    pub fn picture(&self) -> &str {
        self.image_id.as_deref().unwrap_or("captured picture")
    }
}

/// Outward notifications from the game runtime. Every method has a no-op default.
pub trait GameObserver: Send + Sync {
    fn cut_progress(&self, _progress: CutProgress) {}
    fn board_ready(&self, _total: usize, _placed: usize) {}
    fn cut_failed(&self, _message: &str) {}
    fn piece_placed(&self, _placed: usize, _total: usize) {}
    fn saved(&self) {}
    fn completed(&self, _game: &GameOver) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl GameObserver for NoopObserver {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub seconds: u64,
    pub label: String,
}

impl ScoreEntry {
    pub fn new(seconds: u64, finished_at: DateTime<Local>) -> Self {
        Self {
            seconds,
            label: format!(
                "{} - {}",
                format_clock(seconds),
                finished_at.format("%Y-%m-%d %H:%M")
            ),
        }
    }
}

/// Best times per difficulty key, fastest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighScores {
    boards: BTreeMap<String, Vec<ScoreEntry>>,
}

impl HighScores {
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        save_json(path, self)
    }

    pub fn entries(&self, difficulty_key: &str) -> &[ScoreEntry] {
        self.boards
            .get(difficulty_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    /// Inserts a time and returns its 1-based rank, or `None` when it did not
    /// make the list.
    pub fn record(&mut self, difficulty_key: &str, entry: ScoreEntry) -> Option<usize> {
        let entries = self.boards.entry(difficulty_key.to_string()).or_default();
        // Ties go after existing entries.
        let index = entries.partition_point(|existing| existing.seconds <= entry.seconds);
        if index >= HIGH_SCORE_LIMIT {
            return None;
        }
        entries.insert(index, entry);
        entries.truncate(HIGH_SCORE_LIMIT);
        Some(index + 1)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockedPictures {
    pictures: Vec<String>,
}

impl UnlockedPictures {
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        save_json(path, self)
    }

    /// Returns true when the picture was not unlocked before.
    pub fn unlock(&mut self, image_id: &str) -> bool {
        if self.contains(image_id) {
            return false;
        }
        self.pictures.push(image_id.to_string());
        true
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.pictures.iter().any(|picture| picture == image_id)
    }

    pub fn pictures(&self) -> &[String] {
        &self.pictures
    }
}

/// Observer that keeps the leaderboard and the gallery on disk.
pub struct LedgerObserver {
    dir: PathBuf,
    last_rank: Mutex<Option<usize>>,
}

impl LedgerObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_rank: Mutex::new(None),
        }
    }

    pub fn high_scores_path(&self) -> PathBuf {
        self.dir.join(HIGH_SCORES_FILE)
    }

    pub fn unlocked_path(&self) -> PathBuf {
        self.dir.join(UNLOCKED_PICTURES_FILE)
    }

    pub fn last_rank(&self) -> Option<usize> {
        self.last_rank.lock().ok().and_then(|rank| *rank)
    }

    fn record(&self, game: &GameOver) -> Result<Option<usize>, LedgerError> {
        if let Some(image_id) = game.image_id.as_deref() {
            let mut unlocked = UnlockedPictures::load(&self.unlocked_path())?;
            if unlocked.unlock(image_id) {
                unlocked.save(&self.unlocked_path())?;
            }
        }
        let mut scores = HighScores::load(&self.high_scores_path())?;
        let rank = scores.record(
            &game.difficulty_key,
            ScoreEntry::new(game.elapsed_seconds, Local::now()),
        );
        if rank.is_some() {
            scores.save(&self.high_scores_path())?;
        }
        Ok(rank)
    }
}

impl GameObserver for LedgerObserver {
    fn completed(&self, game: &GameOver) {
        match self.record(game) {
            Ok(rank) => {
                if let Some(rank) = rank {
                    log::info!("ledger: {} ranked #{} on {}", game.picture(), rank, game.difficulty_key);
                }
                if let Ok(mut last) = self.last_rank.lock() {
                    *last = rank;
                }
            }
            Err(err) => log::warn!("ledger: failed to record {}: {}", game.picture(), err),
        }
    }
}

fn load_json<T>(path: &Path) -> Result<T, LedgerError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}
