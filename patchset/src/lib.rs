//! Reversible multi-file patch sets for shadow history
//!
//! A [`PatchSet`] bundles one [`FilePatch`] per touched path. Each side of a
//! file patch is identified by a [`Fingerprint`]; the bytes behind a present
//! fingerprint are kept in a content-addressed store by the caller, so a patch
//! can reproduce either side of every file bit-for-bit.
//!
//! ```
//! use patchset::{apply_patch, compute_patch, Direction, FileState};
//! use std::path::Path;
//!
//! let before = FileState::from("");
//! let after = FileState::from("x");
//! let patch = compute_patch(Path::new("a.txt"), &before, &after);
//!
//! let forward = apply_patch(&before, &patch, Direction::Forward, &after).unwrap();
//! assert_eq!(forward, after);
//! let reverse = apply_patch(&forward, &patch, Direction::Reverse, &before).unwrap();
//! assert_eq!(reverse, before);
//! ```

mod fingerprint;
mod render;

pub use fingerprint::{FileState, Fingerprint};
pub use render::render_unified;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors related to patch construction and application
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("{}: current content {actual} does not match patch source {expected}", .path.display())]
    SourceMismatch {
        path: PathBuf,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error("{}: supplied content {actual} does not match patch target {expected}", .path.display())]
    TargetMismatch {
        path: PathBuf,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error("Duplicate path in patch set: {}", .path.display())]
    DuplicatePath { path: PathBuf },
}

pub type PatchResult<T> = Result<T, PatchError>;

/// Which way a patch is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// before -> after
    Forward,
    /// after -> before
    Reverse,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Change to a single file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePatch {
    /// Path relative to the repository root
    pub path: PathBuf,
    pub before: Fingerprint,
    pub after: Fingerprint,
}

impl FilePatch {
    /// State the file must hold before applying in `direction`
    pub fn source(&self, direction: Direction) -> &Fingerprint {
        match direction {
            Direction::Forward => &self.before,
            Direction::Reverse => &self.after,
        }
    }

    /// State the file holds after applying in `direction`
    pub fn target(&self, direction: Direction) -> &Fingerprint {
        match direction {
            Direction::Forward => &self.after,
            Direction::Reverse => &self.before,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }

    /// Check that `content` is the target of this patch in `direction`
    pub fn verify_target(&self, direction: Direction, content: &FileState) -> PatchResult<()> {
        let expected = self.target(direction);
        if content.matches(expected) {
            Ok(())
        } else {
            Err(PatchError::TargetMismatch {
                path: self.path.clone(),
                expected: expected.clone(),
                actual: content.fingerprint(),
            })
        }
    }
}

/// Ordered set of file patches applied as one unit
///
/// Entries are kept sorted by path and each path appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchSet {
    files: Vec<FilePatch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch set, dropping no-op entries
    pub fn from_patches(patches: impl IntoIterator<Item = FilePatch>) -> PatchResult<Self> {
        let mut set = Self::new();
        for patch in patches {
            set.insert(patch)?;
        }
        Ok(set)
    }

    /// Add a file patch. No-op patches are ignored.
    pub fn insert(&mut self, patch: FilePatch) -> PatchResult<()> {
        if patch.is_noop() {
            return Ok(());
        }
        match self.position(&patch.path) {
            Ok(_) => Err(PatchError::DuplicatePath { path: patch.path }),
            Err(idx) => {
                self.files.insert(idx, patch);
                Ok(())
            }
        }
    }

    fn position(&self, path: &Path) -> Result<usize, usize> {
        self.files.binary_search_by(|p| p.path.as_path().cmp(path))
    }

    pub fn files(&self) -> &[FilePatch] {
        &self.files
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilePatch> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|p| p.path.as_path())
    }

    pub fn get(&self, path: &Path) -> Option<&FilePatch> {
        self.position(path).ok().map(|idx| &self.files[idx])
    }

    pub fn touches(&self, path: &Path) -> bool {
        self.position(path).is_ok()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Copy of this set with `path` removed
    pub fn without(&self, path: &Path) -> PatchSet {
        PatchSet {
            files: self
                .files
                .iter()
                .filter(|p| p.path != path)
                .cloned()
                .collect(),
        }
    }

    /// Sequential composition: applying the result forward equals applying
    /// `first` then `second`.
    ///
    /// For a path both sets touch, the result keeps the `before` of `first`
    /// and the `after` of `second`; intermediate content disappears. Entries
    /// that compose to no change are dropped.
    pub fn compose(first: &PatchSet, second: &PatchSet) -> PatchSet {
        let mut files = Vec::with_capacity(first.len() + second.len());
        let mut a = first.files.iter().peekable();
        let mut b = second.files.iter().peekable();

        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.path == y.path => {
                    let merged = FilePatch {
                        path: x.path.clone(),
                        before: x.before.clone(),
                        after: y.after.clone(),
                    };
                    a.next();
                    b.next();
                    merged
                }
                (Some(x), Some(y)) if x.path < y.path => {
                    let only_first = (*x).clone();
                    a.next();
                    only_first
                }
                (Some(_), Some(y)) => {
                    let only_second = (*y).clone();
                    b.next();
                    only_second
                }
                (Some(x), None) => {
                    let only_first = (*x).clone();
                    a.next();
                    only_first
                }
                (None, Some(y)) => {
                    let only_second = (*y).clone();
                    b.next();
                    only_second
                }
                (None, None) => break,
            };
            if !next.is_noop() {
                files.push(next);
            }
        }

        PatchSet { files }
    }
}

impl<'a> IntoIterator for &'a PatchSet {
    type Item = &'a FilePatch;
    type IntoIter = std::slice::Iter<'a, FilePatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Describe the change from `before` to `after` at `path`
pub fn compute_patch(path: &Path, before: &FileState, after: &FileState) -> FilePatch {
    FilePatch {
        path: path.to_path_buf(),
        before: before.fingerprint(),
        after: after.fingerprint(),
    }
}

/// Apply `patch` to `current` in `direction`.
///
/// `target` is the stored content for the target side; it is checked
/// against the patch before being returned, as is `current` against the
/// source side.
pub fn apply_patch(
    current: &FileState,
    patch: &FilePatch,
    direction: Direction,
    target: &FileState,
) -> PatchResult<FileState> {
    let source = patch.source(direction);
    if !current.matches(source) {
        return Err(PatchError::SourceMismatch {
            path: patch.path.clone(),
            expected: source.clone(),
            actual: current.fingerprint(),
        });
    }
    patch.verify_target(direction, target)?;
    Ok(target.clone())
}
