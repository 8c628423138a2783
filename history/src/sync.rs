//! Bridge between recorded patch sets and the user's working files
//!
//! Applying a patch set is two-phase: every target is first staged as a
//! temporary file next to its destination, and only when all of them are
//! staged are they swapped into place. A failed swap restores the files
//! already replaced, so the working tree never ends up half-patched.

use crate::blob::BlobStore;
use crate::error::{HistoryError, HistoryResult};
use crate::STORE_DIR;
use patchset::{apply_patch, compute_patch, Direction, FileState, PatchSet};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File contents captured before an edit, keyed by root-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, FileState>,
}

impl Snapshot {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn get(&self, path: &Path) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileState)> {
        self.files.iter().map(|(p, s)| (p.as_path(), s))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WorkingStateSync {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
}

enum Staged {
    Write(NamedTempFile),
    Remove,
}

struct StagedFile {
    relative: PathBuf,
    absolute: PathBuf,
    previous: FileState,
    staged: Staged,
}

impl WorkingStateSync {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical_root = root.canonicalize().ok();
        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn a caller-supplied path into a clean root-relative one
    pub fn normalize(&self, path: &Path) -> HistoryResult<PathBuf> {
        let outside = || HistoryError::PathOutsideRoot {
            path: path.to_path_buf(),
        };

        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .ok()
                .or_else(|| {
                    self.canonical_root
                        .as_ref()
                        .and_then(|root| path.strip_prefix(root).ok())
                })
                .ok_or_else(outside)?
        } else {
            path
        };

        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !clean.pop() {
                        return Err(outside());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }

        let reserved = clean
            .components()
            .next()
            .is_some_and(|first| first.as_os_str() == STORE_DIR);
        if clean.as_os_str().is_empty() || reserved {
            return Err(outside());
        }
        Ok(clean)
    }

    fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Current content of a root-relative path
    pub fn read_state(&self, relative: &Path) -> HistoryResult<FileState> {
        match fs::read(self.absolute(relative)) {
            Ok(bytes) => Ok(FileState::Present(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileState::Absent),
            Err(e) => Err(e.into()),
        }
    }

    pub fn capture_before(&self, paths: &[PathBuf]) -> HistoryResult<Snapshot> {
        let mut files = BTreeMap::new();
        for path in paths {
            let relative = self.normalize(path)?;
            let state = self.read_state(&relative)?;
            files.insert(relative, state);
        }
        debug!("Captured {} files before edit", files.len());
        Ok(Snapshot { files })
    }

    /// Diff the working files against `before`, storing both sides of every
    /// changed file in `blobs`. Unchanged files are left out.
    pub fn capture_after(&self, before: &Snapshot, blobs: &BlobStore) -> HistoryResult<PatchSet> {
        let mut patch_set = PatchSet::new();
        for (path, previous) in before.iter() {
            let current = self.read_state(path)?;
            let patch = compute_patch(path, previous, &current);
            if patch.is_noop() {
                continue;
            }
            blobs.write(previous)?;
            blobs.write(&current)?;
            patch_set.insert(patch)?;
        }
        Ok(patch_set)
    }

    /// Write the `direction` target of every file in `patch_set`.
    ///
    /// Unless `force` is set each file must currently hold the source side.
    /// Either every file is updated or none is.
    pub fn apply(
        &self,
        patch_set: &PatchSet,
        direction: Direction,
        blobs: &BlobStore,
        force: bool,
    ) -> HistoryResult<()> {
        let staged = self.stage_all(patch_set, direction, blobs, force)?;
        self.swap(staged, direction)
    }

    /// Write every target beside its destination without touching the
    /// destination itself
    fn stage_all(
        &self,
        patch_set: &PatchSet,
        direction: Direction,
        blobs: &BlobStore,
        force: bool,
    ) -> HistoryResult<Vec<StagedFile>> {
        let mut staged = Vec::with_capacity(patch_set.len());
        for patch in patch_set {
            let absolute = self.absolute(&patch.path);
            let previous = self.read_state(&patch.path)?;
            let target = blobs.read(patch.target(direction))?;
            let next = if force {
                patch.verify_target(direction, &target)?;
                target
            } else {
                apply_patch(&previous, patch, direction, &target)?
            };

            let entry = match next {
                FileState::Present(bytes) => Staged::Write(
                    stage(&absolute, &bytes).map_err(HistoryError::working_write(&absolute))?,
                ),
                FileState::Absent => Staged::Remove,
            };
            staged.push(StagedFile {
                relative: patch.path.clone(),
                absolute,
                previous,
                staged: entry,
            });
        }
        Ok(staged)
    }

    /// Move staged files into place, restoring the ones already moved if
    /// any later swap fails
    fn swap(&self, staged: Vec<StagedFile>, direction: Direction) -> HistoryResult<()> {
        let mut swapped: Vec<(PathBuf, FileState)> = Vec::with_capacity(staged.len());
        for file in staged {
            let result = match file.staged {
                Staged::Write(tmp) => tmp
                    .persist(&file.absolute)
                    .map(|_| ())
                    .map_err(|e| e.error),
                Staged::Remove => match fs::remove_file(&file.absolute) {
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            match result {
                Ok(()) => {
                    debug!("Wrote {} ({})", file.relative.display(), direction);
                    swapped.push((file.absolute, file.previous));
                }
                Err(e) => {
                    self.roll_back(swapped);
                    return Err(HistoryError::working_write(file.absolute)(e));
                }
            }
        }
        Ok(())
    }

    fn roll_back(&self, swapped: Vec<(PathBuf, FileState)>) {
        for (path, previous) in swapped.into_iter().rev() {
            if let Err(e) = restore(&path, &previous) {
                warn!("Failed to restore {} after aborted apply: {}", path.display(), e);
            }
        }
    }
}

/// Write `bytes` into a temporary file beside `destination`
fn stage(destination: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = destination
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match fs::metadata(destination) {
        Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions())?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    Ok(tmp)
}

fn restore(path: &Path, previous: &FileState) -> io::Result<()> {
    match previous {
        FileState::Present(bytes) => stage(path, bytes)?
            .persist(path)
            .map(|_| ())
            .map_err(|e| e.error),
        FileState::Absent => match fs::remove_file(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WorkingStateSync, BlobStore) {
        let dir = TempDir::new().unwrap();
        let sync = WorkingStateSync::new(dir.path());
        let blobs = BlobStore::new(dir.path().join(STORE_DIR).join("blobs"));
        (dir, sync, blobs)
    }

    #[test]
    fn test_normalize() {
        let (dir, sync, _) = setup();
        assert_eq!(
            sync.normalize(Path::new("./src/../src/lib.rs")).unwrap(),
            PathBuf::from("src/lib.rs")
        );
        assert_eq!(
            sync.normalize(&dir.path().join("a.txt")).unwrap(),
            PathBuf::from("a.txt")
        );
        for bad in ["../escape.txt", "/etc/passwd", ".shadow/HEAD", "."] {
            assert!(
                matches!(
                    sync.normalize(Path::new(bad)),
                    Err(HistoryError::PathOutsideRoot { .. })
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_capture_roundtrip() {
        let (dir, sync, blobs) = setup();
        fs::write(dir.path().join("a.txt"), "old").unwrap();

        let paths = vec![
            PathBuf::from("a.txt"),
            PathBuf::from("b.txt"),
            PathBuf::from("c.txt"),
        ];
        let before = sync.capture_before(&paths).unwrap();
        assert_eq!(before.get(Path::new("b.txt")), Some(&FileState::Absent));

        fs::write(dir.path().join("a.txt"), "new").unwrap();
        fs::write(dir.path().join("b.txt"), "created").unwrap();
        let patch_set = sync.capture_after(&before, &blobs).unwrap();
        assert_eq!(patch_set.len(), 2);
        assert!(!patch_set.touches(Path::new("c.txt")));

        sync.apply(&patch_set, Direction::Reverse, &blobs, false).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "old");
        assert!(!dir.path().join("b.txt").exists());

        sync.apply(&patch_set, Direction::Forward, &blobs, false).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "created");
    }

    #[test]
    fn test_apply_refuses_diverged_source() {
        let (dir, sync, blobs) = setup();
        let before = sync
            .capture_before(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")])
            .unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let patch_set = sync.capture_after(&before, &blobs).unwrap();

        fs::write(dir.path().join("b.txt"), "changed elsewhere").unwrap();
        assert!(sync.apply(&patch_set, Direction::Reverse, &blobs, false).is_err());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a");

        sync.apply(&patch_set, Direction::Reverse, &blobs, true).unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_apply_creates_parent_directories() {
        let (dir, sync, blobs) = setup();
        let before = sync
            .capture_before(&[PathBuf::from("nested/deep/file.rs")])
            .unwrap();
        fs::create_dir_all(dir.path().join("nested/deep")).unwrap();
        fs::write(dir.path().join("nested/deep/file.rs"), "fn main() {}").unwrap();
        let patch_set = sync.capture_after(&before, &blobs).unwrap();

        fs::remove_dir_all(dir.path().join("nested")).unwrap();
        sync.apply(&patch_set, Direction::Forward, &blobs, false).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/deep/file.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[test]
    fn test_missing_blob_leaves_files_untouched() {
        let (dir, sync, blobs) = setup();
        fs::write(dir.path().join("a.txt"), "v1").unwrap();
        let before = sync.capture_before(&[PathBuf::from("a.txt")]).unwrap();
        fs::write(dir.path().join("a.txt"), "v2").unwrap();
        let patch_set = sync.capture_after(&before, &blobs).unwrap();

        let digest = patch_set.files()[0].before.digest().unwrap().to_string();
        blobs.remove(&digest).unwrap();

        assert!(matches!(
            sync.apply(&patch_set, Direction::Reverse, &blobs, false),
            Err(HistoryError::MissingBlob { .. })
        ));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v2");
    }

    #[test]
    fn test_failed_swap_restores_earlier_files() {
        let (dir, sync, blobs) = setup();
        fs::write(dir.path().join("a.txt"), "a0").unwrap();
        fs::write(dir.path().join("b.txt"), "b0").unwrap();
        let before = sync
            .capture_before(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")])
            .unwrap();
        fs::write(dir.path().join("a.txt"), "a1").unwrap();
        fs::write(dir.path().join("b.txt"), "b1").unwrap();
        let patch_set = sync.capture_after(&before, &blobs).unwrap();

        let staged = sync
            .stage_all(&patch_set, Direction::Reverse, &blobs, false)
            .unwrap();
        // a.txt swaps first; a directory in b.txt's place cannot be replaced
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        fs::create_dir_all(dir.path().join("b.txt/inner")).unwrap();

        assert!(matches!(
            sync.swap(staged, Direction::Reverse),
            Err(HistoryError::WorkingWrite { .. })
        ));
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"a1");
        assert!(dir.path().join("b.txt/inner").is_dir());
    }
}
