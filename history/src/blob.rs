//! Content-addressed file contents
//!
//! Every side of every file patch is stored here once, keyed by its SHA-256
//! digest and sharded by the first two hex characters.

use crate::atomic::write_atomic;
use crate::error::{HistoryError, HistoryResult};
use patchset::{FileState, Fingerprint};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, digest: &str) -> HistoryResult<PathBuf> {
        let valid = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(HistoryError::CorruptBlob {
                digest: digest.to_string(),
            });
        }
        Ok(self.dir.join(&digest[..2]).join(&digest[2..]))
    }

    /// Store `state` and return its fingerprint. Absent states store nothing.
    pub fn write(&self, state: &FileState) -> HistoryResult<Fingerprint> {
        let fingerprint = state.fingerprint();
        if let Some(digest) = fingerprint.digest() {
            let path = self.path_for(digest)?;
            if !path.exists() {
                write_atomic(&path, state.bytes())?;
                debug!("Stored blob {}", fingerprint);
            }
        }
        Ok(fingerprint)
    }

    /// Load the content behind `fingerprint`, verifying it on the way out
    pub fn read(&self, fingerprint: &Fingerprint) -> HistoryResult<FileState> {
        let Some(digest) = fingerprint.digest() else {
            return Ok(FileState::Absent);
        };
        let path = self.path_for(digest)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HistoryError::MissingBlob {
                    digest: digest.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let state = FileState::Present(bytes);
        if !state.matches(fingerprint) {
            return Err(HistoryError::CorruptBlob {
                digest: digest.to_string(),
            });
        }
        Ok(state)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        match fingerprint.digest() {
            None => true,
            Some(digest) => self
                .path_for(digest)
                .map(|path| path.is_file())
                .unwrap_or(false),
        }
    }

    /// Every digest currently on disk
    pub fn digests(&self) -> HistoryResult<BTreeSet<String>> {
        let mut digests = BTreeSet::new();
        let shards = match fs::read_dir(&self.dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(digests),
            Err(e) => return Err(e.into()),
        };
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().to_string();
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let rest = entry.file_name().to_string_lossy().to_string();
                let digest = format!("{}{}", prefix, rest);
                if self.path_for(&digest).is_ok() {
                    digests.insert(digest);
                }
            }
        }
        Ok(digests)
    }

    /// Delete a blob; returns whether it existed
    pub fn remove(&self, digest: &str) -> HistoryResult<bool> {
        let path = self.path_for(digest)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HistoryError::store_write(path)(e)),
        }
    }
}
