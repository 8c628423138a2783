//! Destructive history rewriting
//!
//! Removing a commit relinks each surviving child to the nearest surviving
//! ancestor. The removed commits' changes are folded into that child, so
//! undoing it still lands on its new parent's state while the intermediate
//! contents disappear from history. Blobs nothing references any more are
//! deleted from disk afterwards.

use crate::commit::{Commit, CommitId, Rewrite};
use crate::error::{HistoryError, HistoryResult};
use crate::store::{CommitStore, HeadRef};
use chrono::{DateTime, Utc};
use patchset::PatchSet;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadReset {
    pub from: CommitId,
    pub to: CommitId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<CommitId>,
    /// Surviving commits whose records were rewritten
    pub rewritten: Vec<CommitId>,
    /// Set when HEAD pointed at a removed commit
    pub head_reset: Option<HeadReset>,
    pub blobs_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Commits of abandoned branches that were removed
    pub removed: Vec<CommitId>,
    pub blobs_removed: usize,
}

pub struct PruneManager<'a> {
    store: &'a mut CommitStore,
    head_ref: Option<&'a HeadRef>,
}

impl<'a> PruneManager<'a> {
    pub fn new(store: &'a mut CommitStore) -> Self {
        Self {
            store,
            head_ref: None,
        }
    }

    /// Persist a HEAD reset to `head_ref` before any record is touched, so
    /// HEAD names a surviving commit even if the rewrite stops partway
    pub fn with_head_ref(mut self, head_ref: &'a HeadRef) -> Self {
        self.head_ref = Some(head_ref);
        self
    }

    /// Commits from `to` up to and including its ancestor `from`
    pub fn range(&self, from: &CommitId, to: &CommitId) -> HistoryResult<BTreeSet<CommitId>> {
        let mut doomed = BTreeSet::new();
        for id in self.store.ancestors(to)? {
            let reached = &id == from;
            doomed.insert(id);
            if reached {
                return Ok(doomed);
            }
        }
        Err(HistoryError::PruneTargetInvalid {
            reason: format!("{} is not an ancestor of {}", from.short(), to.short()),
        })
    }

    /// Side branches off HEAD's line whose newest commit is older than
    /// `cutoff`. HEAD, its ancestors and its descendants are never included.
    pub fn stale_branches(
        &self,
        head: &CommitId,
        cutoff: DateTime<Utc>,
    ) -> HistoryResult<BTreeSet<CommitId>> {
        let line = self.store.ancestors(head)?;
        let on_line: HashSet<&CommitId> = line.iter().collect();
        let mut doomed = BTreeSet::new();

        for ancestor in line.iter().skip(1) {
            for child in self.store.children_of(ancestor) {
                if on_line.contains(&child) {
                    continue;
                }
                let mut subtree = self.store.descendants(&child);
                subtree.push(child);
                let newest = subtree
                    .iter()
                    .filter_map(|id| self.store.get(id).ok())
                    .map(|c| c.timestamp)
                    .max();
                if newest.is_some_and(|t| t < cutoff) {
                    doomed.extend(subtree);
                }
            }
        }
        Ok(doomed)
    }

    /// Remove `doomed` from the store
    pub fn prune_commits(
        &mut self,
        doomed: &BTreeSet<CommitId>,
        head: Option<&CommitId>,
    ) -> HistoryResult<PruneReport> {
        self.rewrite(BTreeMap::new(), doomed, head)
    }

    /// Strip `path` from every commit; commits that touched nothing else
    /// are removed
    pub fn prune_path(
        &mut self,
        path: &Path,
        head: Option<&CommitId>,
    ) -> HistoryResult<PruneReport> {
        let now = Utc::now();
        let mut edits = BTreeMap::new();
        let mut doomed = BTreeSet::new();

        let touching: Vec<CommitId> = self
            .store
            .iter()
            .filter(|c| c.patch_set.touches(path))
            .map(|c| c.id.clone())
            .collect();
        if touching.is_empty() {
            return Err(HistoryError::PruneTargetInvalid {
                reason: format!("no commit touches {}", path.display()),
            });
        }

        for id in touching {
            let mut commit = self.store.get(&id)?.clone();
            commit.patch_set = commit.patch_set.without(path);
            if commit.patch_set.is_empty() && !commit.is_root() {
                doomed.insert(id.clone());
            } else {
                mark(&mut commit, now).stripped_entries += 1;
            }
            edits.insert(id, commit);
        }

        self.rewrite(edits, &doomed, head)
    }

    fn rewrite(
        &mut self,
        mut edits: BTreeMap<CommitId, Commit>,
        doomed: &BTreeSet<CommitId>,
        head: Option<&CommitId>,
    ) -> HistoryResult<PruneReport> {
        if let Some(root) = self.store.root() {
            if doomed.contains(root) {
                return Err(HistoryError::PruneTargetInvalid {
                    reason: "the root commit cannot be pruned".to_string(),
                });
            }
        }
        let now = Utc::now();

        let mut orphans = BTreeSet::new();
        for id in doomed {
            for child in self.store.children_of(id) {
                if !doomed.contains(&child) {
                    orphans.insert(child);
                }
            }
        }

        for child in orphans {
            let current = view(self.store, &edits, &child)?.clone();
            let (new_parent, chain) = self.surviving_ancestor(&edits, doomed, &child)?;

            let mut patch_set = PatchSet::new();
            for removed in chain.iter().rev() {
                let folded = view(self.store, &edits, removed)?;
                patch_set = PatchSet::compose(&patch_set, &folded.patch_set);
            }
            patch_set = PatchSet::compose(&patch_set, &current.patch_set);

            let mut relinked = current;
            relinked.parent = Some(new_parent);
            relinked.patch_set = patch_set;
            mark(&mut relinked, now).folded.extend(chain.into_iter().rev());
            edits.insert(child, relinked);
        }

        let head_reset = match head {
            Some(head) if doomed.contains(head) => {
                let (to, _) = self.surviving_ancestor(&edits, doomed, head)?;
                Some(HeadReset {
                    from: head.clone(),
                    to,
                })
            }
            _ => None,
        };

        if let (Some(reset), Some(head_ref)) = (&head_reset, self.head_ref) {
            head_ref.store(&reset.to)?;
        }

        let mut report = PruneReport {
            head_reset,
            ..PruneReport::default()
        };
        for (id, commit) in edits {
            if !doomed.contains(&id) {
                self.store.replace(commit)?;
                report.rewritten.push(id);
            }
        }
        for id in doomed {
            self.store.remove(id)?;
            report.removed.push(id.clone());
        }
        report.blobs_removed = self.sweep_blobs()?;

        warn!(
            removed = report.removed.len(),
            rewritten = report.rewritten.len(),
            blobs = report.blobs_removed,
            "Rewrote shadow history"
        );
        Ok(report)
    }

    /// Nearest ancestor of `id` outside `doomed`, plus the doomed commits
    /// passed on the way up (nearest first)
    fn surviving_ancestor(
        &self,
        edits: &BTreeMap<CommitId, Commit>,
        doomed: &BTreeSet<CommitId>,
        id: &CommitId,
    ) -> HistoryResult<(CommitId, Vec<CommitId>)> {
        let mut chain = Vec::new();
        let mut parent = view(self.store, edits, id)?.parent.clone();
        while let Some(candidate) = parent {
            if !doomed.contains(&candidate) {
                return Ok((candidate, chain));
            }
            parent = view(self.store, edits, &candidate)?.parent.clone();
            chain.push(candidate);
        }
        Err(HistoryError::CorruptHistory {
            reason: format!("{} has no surviving ancestor", id.short()),
        })
    }

    /// Delete every blob no remaining commit refers to
    pub fn sweep_blobs(&self) -> HistoryResult<usize> {
        let referenced = self.store.referenced_digests();
        let mut removed = 0;
        for digest in self.store.blobs().digests()? {
            if !referenced.contains(&digest) && self.store.blobs().remove(&digest)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} unreferenced blobs", removed);
        }
        Ok(removed)
    }
}

fn view<'s>(
    store: &'s CommitStore,
    edits: &'s BTreeMap<CommitId, Commit>,
    id: &CommitId,
) -> HistoryResult<&'s Commit> {
    match edits.get(id) {
        Some(commit) => Ok(commit),
        None => store.get(id),
    }
}

fn mark(commit: &mut Commit, now: DateTime<Utc>) -> &mut Rewrite {
    let rewrite = commit.rewrite.get_or_insert_with(|| Rewrite {
        at: now,
        folded: Vec::new(),
        stripped_entries: 0,
    });
    rewrite.at = now;
    rewrite
}
