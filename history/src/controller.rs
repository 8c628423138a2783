//! The undo/redo state machine
//!
//! [`History`] owns HEAD for one repository root and drives every mutation:
//! recording edits, undo, redo, goto and prune. Each mutating call holds the
//! store lease for its whole duration and re-reads the store first, so
//! several processes can share one history safely.

use crate::atomic::write_atomic;
use crate::commit::{CommitId, Operation};
use crate::config::ShadowConfig;
use crate::conflict::{Conflict, ConflictCheck, ConflictDetector};
use crate::context::read_git_head;
use crate::error::{HistoryError, HistoryResult};
use crate::index::FileIndex;
use crate::journal::{Journal, JournalEntry};
use crate::lease::Lease;
use crate::prune::{GcReport, PruneManager, PruneReport};
use crate::store::{CommitStore, HeadRef};
use crate::sync::{Snapshot, WorkingStateSync};
use crate::STORE_DIR;
use chrono::{DateTime, Duration, Utc};
use patchset::{render_unified, Direction, Fingerprint, PatchSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of recording an edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { id: CommitId, files: Vec<PathBuf> },
    /// Every captured file was left as it was
    Unchanged,
    /// Shadow tracking is turned off
    Disabled,
}

/// One patch application performed by undo, redo or goto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub commit: CommitId,
    pub direction: Direction,
    pub files: Vec<PathBuf>,
}

/// Outcome of a multi-step traversal (undo with a count, or goto)
///
/// A traversal stops at the first step that fails. Steps already taken stay
/// applied and HEAD is left at the farthest point reached.
#[derive(Debug)]
pub struct TraversalReport {
    pub from: Option<CommitId>,
    pub head: Option<CommitId>,
    pub planned: usize,
    pub steps: Vec<Step>,
    pub failure: Option<HistoryError>,
}

impl TraversalReport {
    fn new(from: Option<CommitId>, planned: usize) -> Self {
        Self {
            head: from.clone(),
            from,
            planned,
            steps: Vec::new(),
            failure: None,
        }
    }

    pub fn completed(&self) -> usize {
        self.steps.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// A traversal that made no progress at all is an error
    fn into_result(self) -> HistoryResult<Self> {
        match self.failure {
            Some(failure) if self.steps.is_empty() => Err(failure),
            _ => Ok(self),
        }
    }
}

/// What a single undo would do, computed without touching anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub commit: CommitId,
    pub operation: Operation,
    pub files: Vec<PathBuf>,
    /// Divergence that would stop this step unless forced
    pub conflict: Option<Conflict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub files: Vec<PathBuf>,
    pub git_head: Option<String>,
    pub is_head: bool,
    pub is_root: bool,
    /// More than one child makes this a branch point
    pub children: usize,
    pub rewritten: bool,
}

impl HistoryEntry {
    pub fn is_branch_point(&self) -> bool {
        self.children > 1
    }
}

/// A tracked file whose working content is not what HEAD implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub path: PathBuf,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub head: Option<CommitId>,
    pub edit_count: usize,
    pub branch_points: usize,
    pub drift: Vec<Drift>,
}

/// An operation that was cut off before it finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    /// Pid of the process that held the lease, when known
    pub holder: Option<u32>,
    /// What it was doing, if its journal was readable
    pub entry: Option<JournalEntry>,
    /// Files put back to the state HEAD describes
    pub restored: Vec<PathBuf>,
}

pub struct History {
    root: PathBuf,
    store_dir: PathBuf,
    config: ShadowConfig,
    store: CommitStore,
    head_ref: HeadRef,
    head: Option<CommitId>,
    sync: WorkingStateSync,
    index: FileIndex,
    journal: Journal,
    recovered: Option<Interruption>,
}

impl History {
    /// Open the history of the repository at `root`, reading
    /// `.shadow/config.toml` if present
    pub fn open(root: impl Into<PathBuf>) -> HistoryResult<Self> {
        let root = root.into();
        let config = ShadowConfig::load(&root.join(STORE_DIR))?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(root: impl Into<PathBuf>, config: ShadowConfig) -> HistoryResult<Self> {
        config
            .validate()
            .map_err(|message| HistoryError::Config { message })?;
        let root = root.into();
        let store_dir = root.join(STORE_DIR);
        let store = CommitStore::open(&store_dir)?;
        let head_ref = HeadRef::new(&store_dir);
        let head = load_head(&store, &head_ref)?;
        let index = FileIndex::build(&store);
        debug!(
            "Opened shadow history at {} ({} commits)",
            store_dir.display(),
            store.len()
        );

        Ok(Self {
            sync: WorkingStateSync::new(&root),
            journal: Journal::new(&store_dir),
            root,
            store_dir,
            config,
            store,
            head_ref,
            head,
            index,
            recovered: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    pub fn store(&self) -> &CommitStore {
        &self.store
    }

    /// Interruption found while taking the lease, reported once
    pub fn take_recovered(&mut self) -> Option<Interruption> {
        self.recovered.take()
    }

    /// Bring the in-memory view up to date with disk
    fn refresh(&mut self) -> HistoryResult<()> {
        self.store.reload()?;
        self.head = load_head(&self.store, &self.head_ref)?;
        self.index = FileIndex::build(&self.store);
        Ok(())
    }

    /// Take the lease, refresh, and finish off any interrupted operation
    fn lock(&mut self) -> HistoryResult<Lease> {
        let lease = Lease::acquire(&self.store_dir)?;
        self.refresh()?;
        if self.journal.exists() {
            let entry = self.journal.read().unwrap_or_else(|e| {
                warn!("Unreadable journal left by an interrupted operation: {}", e);
                None
            });
            let restored = match &entry {
                Some(entry) => self.recover(entry)?,
                None => {
                    warn!("Previous operation was interrupted; HEAD was not moved");
                    Vec::new()
                }
            };
            self.journal.clear()?;
            self.recovered = Some(Interruption {
                holder: lease.stale_holder(),
                entry,
                restored,
            });
        }
        Ok(lease)
    }

    /// Make the working files agree with HEAD after a step was cut off.
    /// HEAD only moves once every file is swapped, so if it still names the
    /// starting commit the files go back to the step's source side.
    fn recover(&mut self, entry: &JournalEntry) -> HistoryResult<Vec<PathBuf>> {
        if self.head.as_ref() == Some(&entry.to) {
            warn!(
                "Previous {} was interrupted after HEAD moved to {}; files are current",
                entry.operation,
                entry.to.short()
            );
            return Ok(Vec::new());
        }
        if self.head != entry.from {
            warn!(
                "Previous {} was interrupted and HEAD has moved since; check {} files by hand",
                entry.operation,
                entry.paths.len()
            );
            return Ok(Vec::new());
        }

        let patch_set = self.store.get(&entry.commit)?.patch_set.clone();
        self.sync.apply(
            &patch_set,
            entry.direction.reversed(),
            self.store.blobs(),
            true,
        )?;
        let restored: Vec<PathBuf> = patch_set.paths().map(Path::to_path_buf).collect();
        warn!(
            "Previous {} of {} was interrupted; restored {} files",
            entry.operation,
            entry.commit.short(),
            restored.len()
        );
        Ok(restored)
    }

    fn set_head(&mut self, id: CommitId) -> HistoryResult<()> {
        self.head_ref.store(&id)?;
        self.head = Some(id);
        Ok(())
    }

    fn require_confirmation(&self, operation: &str, confirmed: bool) -> HistoryResult<()> {
        if self.config.confirm_destructive && !confirmed {
            return Err(HistoryError::ConfirmationRequired {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Start an edit: take the lease and snapshot `paths`. The caller
    /// changes the files and then commits or abandons the session.
    pub fn begin_edit(&mut self, paths: &[PathBuf]) -> HistoryResult<EditSession<'_>> {
        if !self.config.enabled {
            return Ok(EditSession {
                history: self,
                active: None,
            });
        }
        let lease = self.lock()?;
        let before = self.sync.capture_before(paths)?;
        Ok(EditSession {
            history: self,
            active: Some((lease, before)),
        })
    }

    fn record_locked(
        &mut self,
        patch_set: PatchSet,
        operation: Operation,
    ) -> HistoryResult<RecordOutcome> {
        if patch_set.is_empty() {
            debug!("Nothing changed for {}", operation.describe());
            return Ok(RecordOutcome::Unchanged);
        }

        let parent = self.ensure_root()?;
        let files: Vec<PathBuf> = patch_set.paths().map(Path::to_path_buf).collect();
        let git_head = read_git_head(&self.root);
        let description = operation.describe();
        let id = self.store.put(Some(&parent), patch_set, operation, git_head)?;
        if let Ok(commit) = self.store.get(&id) {
            self.index.insert(commit);
        }
        if self.store.child_count(&parent) > 1 {
            info!("Edit from {} started a new branch", parent.short());
        }
        self.set_head(id.clone())?;
        info!("Recorded {} as {} ({} files)", description, id.short(), files.len());

        Ok(RecordOutcome::Recorded { id, files })
    }

    /// HEAD, creating the root commit first if history is empty
    fn ensure_root(&mut self) -> HistoryResult<CommitId> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }
        let ignore = self.store_dir.join(".gitignore");
        if !ignore.exists() {
            write_atomic(&ignore, b"*\n")?;
        }
        let root = self
            .store
            .put(None, PatchSet::new(), Operation::root(), None)?;
        self.set_head(root.clone())?;
        info!("Started shadow history at {}", root.short());
        Ok(root)
    }

    /// Apply commit `id` in `direction` and move HEAD accordingly: to its
    /// parent when reversing, to `id` itself when going forward
    fn step(
        &mut self,
        operation: &str,
        id: &CommitId,
        direction: Direction,
        force: bool,
    ) -> HistoryResult<Step> {
        let (destination, patch_set) = {
            let commit = self.store.get(id)?;
            let destination = match direction {
                Direction::Reverse => commit.parent.clone().ok_or_else(|| HistoryError::NoHistory {
                    head: Some(id.clone()),
                })?,
                Direction::Forward => id.clone(),
            };
            (destination, commit.patch_set.clone())
        };
        let files: Vec<PathBuf> = patch_set.paths().map(Path::to_path_buf).collect();

        if !force {
            if let ConflictCheck::Diverged(divergence) =
                ConflictDetector::new(&self.sync).check_patch(&patch_set, direction)?
            {
                return Err(HistoryError::Conflict(divergence.at(id)));
            }
        }

        if !patch_set.is_empty() {
            self.journal.write(&JournalEntry {
                operation: operation.to_string(),
                commit: id.clone(),
                direction,
                from: self.head.clone(),
                to: destination.clone(),
                paths: files.clone(),
                started_at: Utc::now(),
            })?;
            if let Err(e) = self
                .sync
                .apply(&patch_set, direction, self.store.blobs(), force)
            {
                self.journal.clear()?;
                return Err(e);
            }
        }

        if let Err(e) = self.set_head(destination.clone()) {
            if let Err(revert) =
                self.sync
                    .apply(&patch_set, direction.reversed(), self.store.blobs(), true)
            {
                warn!("Could not revert files after HEAD update failed: {}", revert);
                return Err(e);
            }
            self.journal.clear()?;
            return Err(e);
        }
        self.journal.clear()?;

        info!(
            "{} {} ({}, {} files), HEAD now {}",
            operation,
            id.short(),
            direction,
            files.len(),
            destination.short()
        );
        Ok(Step {
            commit: id.clone(),
            direction,
            files,
        })
    }

    /// Revert HEAD's commit `count` times. With `force`, recorded states
    /// overwrite working files even where they diverged.
    pub fn undo(&mut self, count: usize, force: bool) -> HistoryResult<TraversalReport> {
        let _lease = self.lock()?;
        let mut report = TraversalReport::new(self.head.clone(), count);

        for _ in 0..count {
            let result = match self.head.clone() {
                Some(head) => self.step("undo", &head, Direction::Reverse, force),
                None => Err(HistoryError::NoHistory { head: None }),
            };
            match result {
                Ok(step) => report.steps.push(step),
                Err(e) => {
                    if !report.steps.is_empty() {
                        warn!(
                            "Undo stopped after {} of {} steps: {}",
                            report.steps.len(),
                            count,
                            e
                        );
                    }
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report.head = self.head.clone();
        report.into_result()
    }

    /// Commits `undo(count)` would revert and where it would stop, without
    /// changing anything
    pub fn preview_undo(&mut self, count: usize) -> HistoryResult<Vec<PlannedStep>> {
        self.refresh()?;
        let detector = ConflictDetector::new(&self.sync);
        let mut assumed = BTreeMap::new();
        let mut plan = Vec::new();
        let mut current = self.head.clone();

        while plan.len() < count {
            let Some(id) = current else { break };
            let commit = self.store.get(&id)?;
            if commit.is_root() {
                break;
            }
            let conflict = match detector.check_patch_assuming(
                &commit.patch_set,
                Direction::Reverse,
                &assumed,
            )? {
                ConflictCheck::Match => None,
                ConflictCheck::Diverged(divergence) => Some(divergence.at(&id)),
            };
            for patch in &commit.patch_set {
                assumed.insert(patch.path.clone(), patch.before.clone());
            }
            plan.push(PlannedStep {
                commit: id.clone(),
                operation: commit.operation.clone(),
                files: commit.file_list(),
                conflict,
            });
            current = commit.parent.clone();
        }
        Ok(plan)
    }

    /// Reapply a child of HEAD. Without `target` HEAD must have exactly one
    /// child.
    pub fn redo(&mut self, target: Option<&str>, force: bool) -> HistoryResult<Step> {
        let _lease = self.lock()?;
        let head = self
            .head
            .clone()
            .ok_or(HistoryError::NoForwardHistory { head: None })?;
        let children = self.store.children_of(&head);

        let child = match target {
            Some(spec) => {
                let id = self.store.resolve(spec)?;
                if !children.contains(&id) {
                    return Err(HistoryError::NotAChild { id, head });
                }
                id
            }
            None => match children.as_slice() {
                [] => return Err(HistoryError::NoForwardHistory { head: Some(head) }),
                [only] => only.clone(),
                _ => {
                    return Err(HistoryError::AmbiguousRedo {
                        head,
                        candidates: children.clone(),
                    })
                }
            },
        };

        self.step("redo", &child, Direction::Forward, force)
    }

    /// Move to any commit, reverting up to the common ancestor and then
    /// reapplying down to `target`
    pub fn goto(&mut self, target: &str, force: bool) -> HistoryResult<TraversalReport> {
        let _lease = self.lock()?;
        let target = self.store.resolve(target)?;
        let head = self
            .head
            .clone()
            .ok_or(HistoryError::NoHistory { head: None })?;
        let route = self.store.path_between(&head, &target)?;
        let mut report = TraversalReport::new(Some(head), route.len());

        for (id, direction) in route.steps() {
            match self.step("goto", id, direction, force) {
                Ok(step) => report.steps.push(step),
                Err(e) => {
                    warn!(
                        "Goto {} stopped after {} of {} steps: {}",
                        target.short(),
                        report.steps.len(),
                        route.len(),
                        e
                    );
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report.head = self.head.clone();
        report.into_result()
    }

    /// List history, newest first. By default HEAD and its ancestors; with
    /// `all_branches` every commit. `path` restricts to commits touching it.
    pub fn history(
        &mut self,
        path: Option<&Path>,
        all_branches: bool,
    ) -> HistoryResult<Vec<HistoryEntry>> {
        self.refresh()?;
        let path = path.map(|p| self.sync.normalize(p)).transpose()?;

        let ids: Vec<CommitId> = if all_branches {
            let mut commits: Vec<_> = match &path {
                Some(path) => self
                    .index
                    .touching(path)
                    .filter_map(|id| self.store.get(id).ok())
                    .collect(),
                None => self.store.iter().collect(),
            };
            commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
            commits.into_iter().map(|c| c.id.clone()).collect()
        } else {
            match (&self.head, &path) {
                (None, _) => Vec::new(),
                (Some(head), Some(path)) => self.index.history_for(&self.store, head, path)?,
                (Some(head), None) => self.store.ancestors(head)?,
            }
        };

        ids.iter().map(|id| self.entry(id)).collect()
    }

    fn entry(&self, id: &CommitId) -> HistoryResult<HistoryEntry> {
        let commit = self.store.get(id)?;
        Ok(HistoryEntry {
            id: commit.id.clone(),
            parent: commit.parent.clone(),
            timestamp: commit.timestamp,
            operation: commit.operation.clone(),
            files: commit.file_list(),
            git_head: commit.git_head.clone(),
            is_head: self.head.as_ref() == Some(id),
            is_root: commit.is_root(),
            children: self.store.child_count(id),
            rewritten: commit.rewrite.is_some(),
        })
    }

    /// Unified diff of one commit's changes
    pub fn diff(&mut self, commit: &str) -> HistoryResult<String> {
        self.refresh()?;
        let id = self.store.resolve(commit)?;
        let commit = self.store.get(&id)?;
        let blobs = self.store.blobs();
        let mut out = String::new();
        for patch in &commit.patch_set {
            let before = blobs.read(&patch.before)?;
            let after = blobs.read(&patch.after)?;
            out.push_str(&render_unified(&patch.path, &before, &after));
        }
        Ok(out)
    }

    pub fn status(&mut self) -> HistoryResult<Status> {
        self.refresh()?;
        let mut drift = Vec::new();
        if let Some(head) = &self.head {
            for path in self.index.paths() {
                let Some(latest) = self
                    .index
                    .history_for(&self.store, head, path)?
                    .into_iter()
                    .next()
                else {
                    continue;
                };
                let Some(expected) = self
                    .store
                    .get(&latest)?
                    .patch_set
                    .get(path)
                    .map(|p| p.after.clone())
                else {
                    continue;
                };
                let actual = self.sync.read_state(path)?.fingerprint();
                if actual != expected {
                    drift.push(Drift {
                        path: path.to_path_buf(),
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(Status {
            head: self.head.clone(),
            edit_count: self.store.iter().filter(|c| !c.is_root()).count(),
            branch_points: self
                .store
                .iter()
                .filter(|c| self.store.child_count(&c.id) > 1)
                .count(),
            drift,
        })
    }

    /// Remove `to` and its ancestors up to and including `from`
    pub fn prune_range(
        &mut self,
        from: &str,
        to: &str,
        confirmed: bool,
    ) -> HistoryResult<PruneReport> {
        self.require_confirmation("prune", confirmed)?;
        let _lease = self.lock()?;
        let from = self.store.resolve(from)?;
        let to = self.store.resolve(to)?;
        let head = self.head.clone();

        let mut manager = PruneManager::new(&mut self.store).with_head_ref(&self.head_ref);
        let doomed = manager.range(&from, &to)?;
        let report = manager.prune_commits(&doomed, head.as_ref())?;
        self.after_rewrite(&report);
        Ok(report)
    }

    /// Erase `path` from all of history
    pub fn prune_file(&mut self, path: &Path, confirmed: bool) -> HistoryResult<PruneReport> {
        self.require_confirmation("prune", confirmed)?;
        let path = self.sync.normalize(path)?;
        let _lease = self.lock()?;
        let head = self.head.clone();

        let report = PruneManager::new(&mut self.store)
            .with_head_ref(&self.head_ref)
            .prune_path(&path, head.as_ref())?;
        self.after_rewrite(&report);
        Ok(report)
    }

    /// Collect branches abandoned for longer than the retention period and
    /// any unreferenced blobs
    pub fn gc(&mut self, now: DateTime<Utc>, confirmed: bool) -> HistoryResult<GcReport> {
        self.require_confirmation("gc", confirmed)?;
        let _lease = self.lock()?;
        let cutoff = now - Duration::days(i64::from(self.config.retention_days));
        let head = self.head.clone();

        let mut manager = PruneManager::new(&mut self.store).with_head_ref(&self.head_ref);
        let doomed = match &head {
            Some(head) => manager.stale_branches(head, cutoff)?,
            None => Default::default(),
        };
        let report = if doomed.is_empty() {
            GcReport {
                removed: Vec::new(),
                blobs_removed: manager.sweep_blobs()?,
            }
        } else {
            let pruned = manager.prune_commits(&doomed, head.as_ref())?;
            self.after_rewrite(&pruned);
            GcReport {
                removed: pruned.removed,
                blobs_removed: pruned.blobs_removed,
            }
        };

        info!(
            "Collected {} commits and {} blobs older than {}",
            report.removed.len(),
            report.blobs_removed,
            cutoff.format("%Y-%m-%d")
        );
        Ok(report)
    }

    fn after_rewrite(&mut self, report: &PruneReport) {
        if let Some(reset) = &report.head_reset {
            warn!(
                "HEAD {} was pruned; reset to {}. Working files were left as they are.",
                reset.from.short(),
                reset.to.short()
            );
            self.head = Some(reset.to.clone());
        }
        self.index = FileIndex::build(&self.store);
    }
}

/// An edit in progress, holding the lease until committed or abandoned
pub struct EditSession<'h> {
    history: &'h mut History,
    active: Option<(Lease, Snapshot)>,
}

impl EditSession<'_> {
    /// Paths captured for this edit
    pub fn paths(&self) -> Vec<PathBuf> {
        self.active
            .as_ref()
            .map(|(_, before)| before.paths().map(Path::to_path_buf).collect())
            .unwrap_or_default()
    }

    /// Diff the working files against the snapshot taken when the session
    /// began, storing both sides of every changed file. The lease keeps the
    /// stored contents from being collected before they are recorded.
    pub fn capture_after(&self) -> HistoryResult<PatchSet> {
        match &self.active {
            Some((_, before)) => self
                .history
                .sync
                .capture_after(before, self.history.store.blobs()),
            None => Ok(PatchSet::new()),
        }
    }

    /// Record `patch_set`, as produced by [`capture_after`](Self::capture_after),
    /// as a child of HEAD and release the lease
    pub fn record_edit(
        self,
        patch_set: PatchSet,
        operation: Operation,
    ) -> HistoryResult<RecordOutcome> {
        let Some((lease, _)) = self.active else {
            return Ok(RecordOutcome::Disabled);
        };
        let outcome = self.history.record_locked(patch_set, operation);
        drop(lease);
        outcome
    }

    /// Record whatever changed since the session began
    pub fn commit(self, operation: Operation) -> HistoryResult<RecordOutcome> {
        let patch_set = self.capture_after()?;
        self.record_edit(patch_set, operation)
    }

    /// Release the lease without recording anything
    pub fn abandon(self) {
        debug!("Abandoned edit of {} files", self.paths().len());
    }
}

fn load_head(store: &CommitStore, head_ref: &HeadRef) -> HistoryResult<Option<CommitId>> {
    match head_ref.load()? {
        Some(id) if store.contains(&id) => Ok(Some(id)),
        Some(id) => Err(HistoryError::CorruptHistory {
            reason: format!("HEAD points at unknown commit {}", id),
        }),
        None => match store.root() {
            Some(root) => {
                warn!("HEAD is missing; falling back to root {}", root.short());
                Ok(Some(root.clone()))
            }
            None => Ok(None),
        },
    }
}
