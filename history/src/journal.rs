//! Record of a working-file swap in progress
//!
//! Written before the first file is swapped and removed once HEAD has moved.
//! Finding one under a reclaimed lease means an operation was interrupted,
//! and the entry says which patch set to take back to its source side.

use crate::atomic::write_atomic;
use crate::commit::CommitId;
use crate::error::{HistoryError, HistoryResult};
use chrono::{DateTime, Utc};
use patchset::Direction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = "JOURNAL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// "undo", "redo", "goto" and so on
    pub operation: String,
    /// Commit whose patch set was being applied
    pub commit: CommitId,
    pub direction: Direction,
    pub from: Option<CommitId>,
    pub to: CommitId,
    pub paths: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(store_dir: &Path) -> Self {
        Self {
            path: store_dir.join(JOURNAL_FILE),
        }
    }

    pub fn write(&self, entry: &JournalEntry) -> HistoryResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(entry)?)
    }

    /// The pending entry, if any. An unreadable journal is reported as an
    /// entry-less interruption by the caller, so parse errors surface here.
    pub fn read(&self) -> HistoryResult<Option<JournalEntry>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn clear(&self) -> HistoryResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::store_write(&self.path)(e)),
        }
    }
}
