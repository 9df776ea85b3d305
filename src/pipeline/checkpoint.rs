//! Checkpointing for resumable backfill runs
//!
//! A checkpoint records the cursor of the next outer page to fetch and the
//! number of records published so far. It is written after every page and
//! removed once the listing is exhausted, so its presence alone means
//! "resume from here".

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors raised by checkpoint stores
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Reading, writing or removing the file failed
    #[error("Checkpoint IO error with {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored checkpoint could not be parsed
    #[error("Checkpoint at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The checkpoint could not be serialized
    #[error("Checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The store refused the operation
    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Persisted resume state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Cursor of the next outer page
    pub cursor: Option<String>,
    /// Records published across all runs so far
    pub processed_count: u64,
    /// When the checkpoint was written
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time
    pub fn new(cursor: Option<String>, processed_count: u64) -> Self {
        Self {
            cursor,
            processed_count,
            timestamp: Utc::now(),
        }
    }

    /// Cursor to resume from, if any
    pub fn resume_cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}

/// Accept RFC 3339 as well as naive ISO-8601 timestamps (read as UTC)
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Storage for the resume checkpoint
pub trait CheckpointStore {
    /// Load the checkpoint, `None` when absent
    fn load(&self) -> CheckpointResult<Option<Checkpoint>>;

    /// Replace the stored checkpoint
    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;

    /// Remove the checkpoint; succeeds when already absent
    fn clear(&self) -> CheckpointResult<()>;
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for &T {
    fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        (**self).load()
    }

    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        (**self).save(checkpoint)
    }

    fn clear(&self) -> CheckpointResult<()> {
        (**self).clear()
    }
}

/// JSON checkpoint file on local disk
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location for `account_id` inside `dir`
    pub fn for_account(dir: &Path, account_id: &str) -> Self {
        Self::new(Self::default_path(dir, account_id))
    }

    /// Default checkpoint file for an account
    pub fn default_path(dir: &Path, account_id: &str) -> PathBuf {
        dir.join(format!("checkpoint_healthevents_{account_id}.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let checkpoint = serde_json::from_str(&json).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(checkpoint))
    }

    /// Write to a sibling temp file, then rename over the target
    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let json = serde_json::to_string(checkpoint)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn clear(&self) -> CheckpointResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-memory checkpoint store
///
/// Keeps every saved checkpoint in order so tests can check how the
/// checkpoint advanced. Also used for dry runs, where nothing may be
/// written to disk.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    current: RefCell<Option<Checkpoint>>,
    history: RefCell<Vec<Checkpoint>>,
    clears: RefCell<usize>,
    fail_saves: bool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            current: RefCell::new(Some(checkpoint)),
            ..Self::default()
        }
    }

    /// Make every save fail
    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    /// The checkpoint currently stored
    pub fn current(&self) -> Option<Checkpoint> {
        self.current.borrow().clone()
    }

    /// Every checkpoint saved, oldest first
    pub fn history(&self) -> Vec<Checkpoint> {
        self.history.borrow().clone()
    }

    /// Number of times the checkpoint was cleared
    pub fn clears(&self) -> usize {
        *self.clears.borrow()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        Ok(self.current())
    }

    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        if self.fail_saves {
            return Err(CheckpointError::Unavailable("saves disabled".to_string()));
        }
        *self.current.borrow_mut() = Some(checkpoint.clone());
        self.history.borrow_mut().push(checkpoint.clone());
        Ok(())
    }

    fn clear(&self) -> CheckpointResult<()> {
        *self.current.borrow_mut() = None;
        *self.clears.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_default_checkpoint_path() {
        let path = FileCheckpointStore::default_path(Path::new("/state"), "123456789012");
        assert_eq!(
            path,
            PathBuf::from("/state/checkpoint_healthevents_123456789012.json")
        );
    }

    #[test]
    fn test_persisted_shape_is_exact() {
        let checkpoint = Checkpoint {
            cursor: Some("tok123".to_string()),
            processed_count: 7,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap(),
        };
        let value = serde_json::to_value(&checkpoint).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();

        assert_eq!(keys.len(), 3);
        assert_eq!(value["cursor"], "tok123");
        assert_eq!(value["processed_count"], 7);
        assert!(value["timestamp"].as_str().unwrap().starts_with("2024-03-01T10:30:00"));
    }

    #[test]
    fn test_reads_naive_timestamps() {
        let json = r#"{"cursor": null, "processed_count": 3, "timestamp": "2024-03-01T10:30:00.123456"}"#;
        let checkpoint: Checkpoint = serde_json::from_str(json).unwrap();
        assert!(checkpoint.cursor.is_none());
        assert_eq!(checkpoint.processed_count, 3);
        assert_eq!(
            checkpoint.timestamp.date_naive(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().date_naive()
        );
    }

    #[test]
    fn test_file_store_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::for_account(temp.path(), "acct");

        assert!(store.load().unwrap().is_none());

        store.save(&Checkpoint::new(Some("tok123".into()), 2)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.resume_cursor(), Some("tok123"));
        assert_eq!(loaded.processed_count, 2);

        store.save(&Checkpoint::new(Some("tok456".into()), 5)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().processed_count, 5);

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::for_account(&temp.path().join("nested"), "acct");
        store.save(&Checkpoint::new(Some("tok123".into()), 1)).unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path().join("nested"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["checkpoint_healthevents_acct.json"]);
    }

    #[test]
    fn test_file_store_reports_corruption() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::for_account(temp.path(), "acct");
        std::fs::write(store.path(), "{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn test_memory_store_records_history() {
        let store = MemoryCheckpointStore::new();
        store.save(&Checkpoint::new(Some("tok1".into()), 1)).unwrap();
        store.save(&Checkpoint::new(Some("tok2".into()), 3)).unwrap();
        store.clear().unwrap();

        assert!(store.current().is_none());
        assert_eq!(store.history().len(), 2);
        assert_eq!(store.clears(), 1);
    }

    #[test]
    fn test_memory_store_failing_saves() {
        let store = MemoryCheckpointStore::new().failing_saves();
        assert!(store.save(&Checkpoint::new(None, 0)).is_err());
        assert!(store.current().is_none());
    }
}
