//! JSON-file persistence for settings, the autofill profile and command history.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::StoreError;
use crate::types::{HISTORY_LIMIT, HistoryEntry, Profile, Settings};

const SETTINGS_FILE: &str = "settings.json";
const PROFILE_FILE: &str = "profile.json";
const HISTORY_FILE: &str = "history.json";

pub struct Store {
    dir: PathBuf,
    history_lock: Mutex<()>,
}

impl Store {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            history_lock: Mutex::new(()),
        })
    }

    /// `<local data dir>/page-pilot`.
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        dirs::data_local_dir()
            .map(|dir| dir.join("page-pilot"))
            .ok_or(StoreError::NoDataDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_settings(&self) -> Result<Settings, StoreError> {
        self.read_json(SETTINGS_FILE)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.write_json(SETTINGS_FILE, settings)
    }

    pub fn load_profile(&self) -> Result<Profile, StoreError> {
        self.read_json(PROFILE_FILE)
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.write_json(PROFILE_FILE, profile)
    }

    /// Recorded commands, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.read_json(HISTORY_FILE)
    }

    /// Append a command, evicting the oldest entries beyond the cap.
    /// An unreadable history file is replaced rather than blocking every append.
    pub fn add_to_history(&self, command: &str) -> Result<(), StoreError> {
        let _guard = self
            .history_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut history = match self.history() {
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(error = %e, "history file unreadable, starting over");
                Vec::new()
            }
            other => other?,
        };
        history.push(HistoryEntry {
            timestamp: now_millis(),
            command: command.to_string(),
        });
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
        self.write_json(HISTORY_FILE, &history)
    }

    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let file = std::fs::File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Write to a sibling temp file, then rename it over `name`.
    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let file = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        let file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
