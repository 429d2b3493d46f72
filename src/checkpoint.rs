//! Single-slot send progress persisted as JSON.
//!
//! The file keeps `last_row` (the highest row index sent successfully) and
//! `next_row`, the row the next run starts from. Resume is exclusive: a row
//! that was sent is never the first row of the following run.
//!
//! Writes go to a sibling temp file that is synced and renamed over the
//! target, so a reader sees either the old or the new checkpoint.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CheckpointError;

/// Persisted progress marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest row index sent successfully (0 when nothing was sent yet).
    pub last_row: usize,
    /// First row of the next run. Absent in files that predate it, in which
    /// case resume starts just after a non-zero `last_row`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Row index the next run starts from.
    pub fn resume_index(&self) -> usize {
        match self.next_row {
            Some(next) => next,
            None if self.last_row == 0 => 0,
            None => self.last_row + 1,
        }
    }

    /// Record a confirmed send of `row`. Never moves backwards.
    pub fn record_sent(&mut self, row: usize) {
        let next = self.resume_index().max(row + 1);
        self.last_row = self.last_row.max(row);
        self.next_row = Some(next);
        self.updated_at = Some(Utc::now());
    }
}

/// Storage for the run checkpoint.
pub trait ProgressStore: Send + Sync {
    /// Load the checkpoint; a missing one is the zero checkpoint.
    fn load(&self) -> Result<Checkpoint, CheckpointError>;

    /// Overwrite the stored checkpoint.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// JSON file store with write-then-rename replacement.
#[derive(Debug, Clone)]
pub struct JsonProgressStore {
    path: PathBuf,
}

impl JsonProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_err(&self, reason: impl std::fmt::Display) -> CheckpointError {
        CheckpointError::Write {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ProgressStore for JsonProgressStore {
    fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint yet, starting fresh");
                return Ok(Checkpoint::default());
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
        }

        let temp_path = self.temp_path();
        let file = File::create(&temp_path).map_err(|e| self.write_err(e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, checkpoint).map_err(|e| self.write_err(e))?;
        writer.flush().map_err(|e| self.write_err(e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| self.write_err(e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            self.write_err(e)
        })?;

        debug!(
            last_row = checkpoint.last_row,
            next_row = checkpoint.resume_index(),
            "Checkpoint saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_yields_zero_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path().join("state.json"));
        let checkpoint = store.load().unwrap();
        assert_eq!(checkpoint.last_row, 0);
        assert_eq!(checkpoint.resume_index(), 0);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path().join("nested/state.json"));

        let mut checkpoint = Checkpoint::default();
        checkpoint.record_sent(3);
        store.save(&checkpoint).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.last_row, 3);
        assert_eq!(loaded.resume_index(), 4);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_carries_last_row_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path().join("state.json"));
        let mut checkpoint = Checkpoint::default();
        checkpoint.record_sent(1);
        store.save(&checkpoint).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["last_row"], 1);
        assert_eq!(raw["next_row"], 2);
    }

    #[test]
    fn legacy_file_resumes_after_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"last_row": 7}"#).unwrap();

        let checkpoint = JsonProgressStore::new(&path).load().unwrap();
        assert_eq!(checkpoint.last_row, 7);
        assert_eq!(checkpoint.resume_index(), 8);
    }

    #[test]
    fn legacy_zero_file_starts_from_the_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"last_row": 0}"#).unwrap();

        let mut checkpoint = JsonProgressStore::new(&path).load().unwrap();
        assert_eq!(checkpoint.resume_index(), 0);

        checkpoint.record_sent(0);
        assert_eq!(checkpoint.resume_index(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"last_row\": ").unwrap();

        assert!(matches!(
            JsonProgressStore::new(&path).load(),
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[test]
    fn unwritable_location_fails_with_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let store = JsonProgressStore::new(blocker.join("state.json"));
        assert!(matches!(
            store.save(&Checkpoint::default()),
            Err(CheckpointError::Write { .. })
        ));
    }

    #[test]
    fn record_sent_never_moves_backwards() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.record_sent(5);
        checkpoint.record_sent(2);
        assert_eq!(checkpoint.last_row, 5);
        assert_eq!(checkpoint.resume_index(), 6);
    }
}
