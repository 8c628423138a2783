//! Durable commit arena
//!
//! Commits live one per file under `commits/`, named by id. The in-memory
//! arena maps ids to records and keeps the reverse child relation, so the
//! history graph never holds pointers into itself.

use crate::atomic::write_atomic;
use crate::blob::BlobStore;
use crate::commit::{Commit, CommitId, Operation};
use crate::error::{HistoryError, HistoryResult};
use chrono::Utc;
use patchset::{Direction, PatchSet};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Shortest accepted abbreviation of a commit id
pub const MIN_PREFIX_LEN: usize = 4;

pub struct CommitStore {
    dir: PathBuf,
    commits_dir: PathBuf,
    blobs: BlobStore,
    commits: HashMap<CommitId, Commit>,
    children: HashMap<CommitId, BTreeSet<CommitId>>,
}

/// Route through the tree between two commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    /// Nearest common ancestor of both ends
    pub ancestor: CommitId,
    /// Commits to revert, starting at the origin and walking up
    pub up: Vec<CommitId>,
    /// Commits to reapply, from just below the ancestor down to the target
    pub down: Vec<CommitId>,
}

impl Traversal {
    pub fn steps(&self) -> impl Iterator<Item = (&CommitId, Direction)> {
        self.up
            .iter()
            .map(|id| (id, Direction::Reverse))
            .chain(self.down.iter().map(|id| (id, Direction::Forward)))
    }

    pub fn len(&self) -> usize {
        self.up.len() + self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommitStore {
    /// Open the store rooted at `dir` (the `.shadow` directory). A missing
    /// directory is an empty store; nothing is created until the first write.
    pub fn open(dir: impl Into<PathBuf>) -> HistoryResult<Self> {
        let dir = dir.into();
        let mut store = Self {
            commits_dir: dir.join("commits"),
            blobs: BlobStore::new(dir.join("blobs")),
            dir,
            commits: HashMap::new(),
            children: HashMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Re-read every record from disk
    pub fn reload(&mut self) -> HistoryResult<()> {
        self.commits.clear();
        self.children.clear();
        self.load()
    }

    fn load(&mut self) -> HistoryResult<()> {
        let entries = match fs::read_dir(&self.commits_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let commit: Commit = match fs::read(&path)
                .map_err(HistoryError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(HistoryError::from))
            {
                Ok(commit) => commit,
                Err(e) => {
                    warn!("Skipping unreadable commit record {}: {}", path.display(), e);
                    continue;
                }
            };
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem != commit.id.as_str() {
                warn!(
                    "Skipping commit record {} whose id is {}",
                    path.display(),
                    commit.id
                );
                continue;
            }
            self.index(commit);
        }

        for commit in self.commits.values() {
            if let Some(parent) = &commit.parent {
                if !self.commits.contains_key(parent) {
                    warn!("Commit {} refers to missing parent {}", commit.id, parent);
                }
            }
        }

        debug!("Loaded {} commits from {}", self.commits.len(), self.dir.display());
        Ok(())
    }

    fn index(&mut self, commit: Commit) {
        if let Some(parent) = &commit.parent {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(commit.id.clone());
        }
        self.commits.insert(commit.id.clone(), commit);
    }

    fn unindex(&mut self, id: &CommitId) -> Option<Commit> {
        let commit = self.commits.remove(id)?;
        if let Some(parent) = &commit.parent {
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.remove(id);
                if siblings.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
        Some(commit)
    }

    fn record_path(&self, id: &CommitId) -> PathBuf {
        self.commits_dir.join(format!("{}.json", id))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Append a commit. Identical parent, patch set and operation always map
    /// to the same id; storing it again changes nothing.
    pub fn put(
        &mut self,
        parent: Option<&CommitId>,
        patch_set: PatchSet,
        operation: Operation,
        git_head: Option<String>,
    ) -> HistoryResult<CommitId> {
        if let Some(parent) = parent {
            if !self.commits.contains_key(parent) {
                return Err(HistoryError::NotFound { id: parent.clone() });
            }
        }
        for patch in &patch_set {
            for side in [&patch.before, &patch.after] {
                if !self.blobs.contains(side) {
                    return Err(HistoryError::MissingBlob {
                        digest: side.digest().unwrap_or_default().to_string(),
                    });
                }
            }
        }

        let commit = Commit::new(parent.cloned(), operation, patch_set, Utc::now(), git_head)?;
        if self.commits.contains_key(&commit.id) {
            debug!("Commit {} already stored", commit.id);
            return Ok(commit.id);
        }

        self.write_record(&commit)?;
        let id = commit.id.clone();
        self.index(commit);
        Ok(id)
    }

    fn write_record(&self, commit: &Commit) -> HistoryResult<()> {
        let bytes = serde_json::to_vec_pretty(commit)?;
        write_atomic(&self.record_path(&commit.id), &bytes)
    }

    pub fn get(&self, id: &CommitId) -> HistoryResult<&Commit> {
        self.commits
            .get(id)
            .ok_or_else(|| HistoryError::NotFound { id: id.clone() })
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    /// Children ordered oldest first
    pub fn children_of(&self, id: &CommitId) -> Vec<CommitId> {
        let mut children: Vec<&Commit> = self
            .children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.commits.get(child))
            .collect();
        children.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        children.into_iter().map(|c| c.id.clone()).collect()
    }

    pub fn child_count(&self, id: &CommitId) -> usize {
        self.children.get(id).map_or(0, BTreeSet::len)
    }

    /// `id` followed by each of its ancestors up to the root
    pub fn ancestors(&self, id: &CommitId) -> HistoryResult<Vec<CommitId>> {
        let mut chain = Vec::new();
        let mut current = Some(id.clone());
        while let Some(cur) = current {
            if chain.len() > self.commits.len() {
                return Err(HistoryError::CorruptHistory {
                    reason: format!("parent cycle through {}", cur),
                });
            }
            let commit = self.get(&cur)?;
            current = commit.parent.clone();
            chain.push(cur);
        }
        Ok(chain)
    }

    /// Every commit below `id`, excluding `id` itself
    pub fn descendants(&self, id: &CommitId) -> Vec<CommitId> {
        let mut found = Vec::new();
        let mut stack = vec![id.clone()];
        let mut seen = HashSet::new();
        while let Some(cur) = stack.pop() {
            if let Some(children) = self.children.get(&cur) {
                for child in children {
                    if seen.insert(child.clone()) {
                        found.push(child.clone());
                        stack.push(child.clone());
                    }
                }
            }
        }
        found
    }

    /// Route from `from` to `to` via their nearest common ancestor
    pub fn path_between(&self, from: &CommitId, to: &CommitId) -> HistoryResult<Traversal> {
        let upward = self.ancestors(from)?;
        let depth: HashMap<&CommitId, usize> =
            upward.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut down = Vec::new();
        let mut current = to.clone();
        loop {
            if let Some(&distance) = depth.get(&current) {
                down.reverse();
                return Ok(Traversal {
                    ancestor: current,
                    up: upward[..distance].to_vec(),
                    down,
                });
            }
            let parent = self.get(&current)?.parent.clone();
            down.push(current);
            match parent {
                Some(parent) if down.len() <= self.commits.len() => current = parent,
                _ => {
                    return Err(HistoryError::CorruptHistory {
                        reason: format!("{} and {} share no ancestor", from, to),
                    })
                }
            }
        }
    }

    /// The parentless commit, if history has started
    pub fn root(&self) -> Option<&CommitId> {
        self.commits
            .values()
            .filter(|c| c.is_root())
            .min_by_key(|c| c.timestamp)
            .map(|c| &c.id)
    }

    /// Resolve a full id or an unambiguous prefix
    pub fn resolve(&self, spec: &str) -> HistoryResult<CommitId> {
        let spec = spec.trim().to_ascii_lowercase();
        let exact = CommitId::from_hex(spec.clone());
        if self.commits.contains_key(&exact) {
            return Ok(exact);
        }
        if spec.len() < MIN_PREFIX_LEN {
            return Err(HistoryError::NoSuchCommit { id: spec });
        }

        let mut matches: Vec<CommitId> = self
            .commits
            .keys()
            .filter(|id| id.as_str().starts_with(&spec))
            .cloned()
            .collect();
        match matches.len() {
            0 => Err(HistoryError::NoSuchCommit { id: spec }),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                Err(HistoryError::AmbiguousId {
                    prefix: spec,
                    matches,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.commits.values()
    }

    /// Digests referenced by any stored commit
    pub fn referenced_digests(&self) -> HashSet<String> {
        self.commits
            .values()
            .flat_map(|c| c.patch_set.iter())
            .flat_map(|p| [p.before.digest(), p.after.digest()])
            .flatten()
            .map(str::to_string)
            .collect()
    }

    /// Overwrite an existing record in place. Only history rewriting uses this.
    pub(crate) fn replace(&mut self, commit: Commit) -> HistoryResult<()> {
        if !self.commits.contains_key(&commit.id) {
            return Err(HistoryError::NotFound { id: commit.id });
        }
        self.write_record(&commit)?;
        self.unindex(&commit.id);
        self.index(commit);
        Ok(())
    }

    /// Delete a record. Only history rewriting uses this.
    pub(crate) fn remove(&mut self, id: &CommitId) -> HistoryResult<Commit> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(HistoryError::store_write(path)(e)),
        }
        let removed = self
            .unindex(id)
            .ok_or_else(|| HistoryError::NotFound { id: id.clone() })?;
        info!("Removed commit {} ({})", id.short(), removed.operation.describe());
        Ok(removed)
    }
}

/// Persisted HEAD pointer
#[derive(Debug, Clone)]
pub struct HeadRef {
    path: PathBuf,
}

impl HeadRef {
    pub fn new(store_dir: &Path) -> Self {
        Self {
            path: store_dir.join("HEAD"),
        }
    }

    pub fn load(&self) -> HistoryResult<Option<CommitId>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                let id = text.trim();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(CommitId::from_hex(id)))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, id: &CommitId) -> HistoryResult<()> {
        write_atomic(&self.path, format!("{}\n", id).as_bytes())
    }
}
