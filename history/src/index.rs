//! Per-file history index
//!
//! Derived entirely from the commit store and rebuilt whenever the store is
//! rewritten; it never holds information the store lacks.

use crate::commit::{Commit, CommitId};
use crate::error::HistoryResult;
use crate::store::CommitStore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    by_path: BTreeMap<PathBuf, BTreeSet<CommitId>>,
}

impl FileIndex {
    pub fn build(store: &CommitStore) -> Self {
        let mut index = Self::default();
        for commit in store.iter() {
            index.insert(commit);
        }
        index
    }

    pub fn insert(&mut self, commit: &Commit) {
        for path in commit.files() {
            self.by_path
                .entry(path.to_path_buf())
                .or_default()
                .insert(commit.id.clone());
        }
    }

    /// Every commit on any branch that touches `path`
    pub fn touching(&self, path: &Path) -> impl Iterator<Item = &CommitId> {
        self.by_path.get(path).into_iter().flatten()
    }

    /// Commits touching `path` on the line from `head` to the root, newest
    /// first
    pub fn history_for(
        &self,
        store: &CommitStore,
        head: &CommitId,
        path: &Path,
    ) -> HistoryResult<Vec<CommitId>> {
        let Some(ids) = self.by_path.get(path) else {
            return Ok(Vec::new());
        };
        Ok(store
            .ancestors(head)?
            .into_iter()
            .filter(|id| ids.contains(id))
            .collect())
    }

    /// Every path any commit has touched
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }
}
