use crate::commit::CommitId;
use crate::error::HistoryResult;
use crate::sync::WorkingStateSync;
use patchset::{Direction, Fingerprint, PatchSet};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A working file no longer holds the state history expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Commit being traversed when the divergence was found
    pub commit: CommitId,
    pub path: PathBuf,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conflict in {} at commit {}: expected {}, found {}",
            self.path.display(),
            self.commit.short(),
            self.expected,
            self.actual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub path: PathBuf,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

impl Divergence {
    pub fn at(self, commit: &CommitId) -> Conflict {
        Conflict {
            commit: commit.clone(),
            path: self.path,
            expected: self.expected,
            actual: self.actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    Match,
    Diverged(Divergence),
}

impl ConflictCheck {
    pub fn is_match(&self) -> bool {
        matches!(self, ConflictCheck::Match)
    }
}

/// Compares working files against recorded fingerprints
pub struct ConflictDetector<'a> {
    sync: &'a WorkingStateSync,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(sync: &'a WorkingStateSync) -> Self {
        Self { sync }
    }

    /// Report the first path whose current content differs from `expected`
    pub fn check<'p>(
        &self,
        expected: impl IntoIterator<Item = (&'p Path, &'p Fingerprint)>,
    ) -> HistoryResult<ConflictCheck> {
        self.check_with(expected, &BTreeMap::new())
    }

    /// Check that every file holds the source side of `patch_set` for
    /// `direction`
    pub fn check_patch(
        &self,
        patch_set: &PatchSet,
        direction: Direction,
    ) -> HistoryResult<ConflictCheck> {
        self.check(patch_set.iter().map(|p| (p.path.as_path(), p.source(direction))))
    }

    /// Like [`check_patch`](Self::check_patch), but paths present in
    /// `assumed` are taken to hold that state instead of being read
    pub fn check_patch_assuming(
        &self,
        patch_set: &PatchSet,
        direction: Direction,
        assumed: &BTreeMap<PathBuf, Fingerprint>,
    ) -> HistoryResult<ConflictCheck> {
        self.check_with(
            patch_set.iter().map(|p| (p.path.as_path(), p.source(direction))),
            assumed,
        )
    }

    fn check_with<'p>(
        &self,
        expected: impl IntoIterator<Item = (&'p Path, &'p Fingerprint)>,
        assumed: &BTreeMap<PathBuf, Fingerprint>,
    ) -> HistoryResult<ConflictCheck> {
        for (path, want) in expected {
            let actual = match assumed.get(path) {
                Some(fingerprint) => fingerprint.clone(),
                None => self.sync.read_state(path)?.fingerprint(),
            };
            if &actual != want {
                debug!("{} diverged: expected {}, found {}", path.display(), want, actual);
                return Ok(ConflictCheck::Diverged(Divergence {
                    path: path.to_path_buf(),
                    expected: want.clone(),
                    actual,
                }));
            }
        }
        Ok(ConflictCheck::Match)
    }
}
