use crate::commit::CommitId;
use crate::conflict::Conflict;
use patchset::PatchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Nothing to undo: HEAD {} has no parent", at(.head))]
    NoHistory { head: Option<CommitId> },

    #[error("Nothing to redo: HEAD {} has no children", at(.head))]
    NoForwardHistory { head: Option<CommitId> },

    #[error("Cannot redo from branch point {head}: choose one of {}", list(.candidates))]
    AmbiguousRedo {
        head: CommitId,
        candidates: Vec<CommitId>,
    },

    #[error("{0}")]
    Conflict(Conflict),

    #[error("Commit not found in store: {id}")]
    NotFound { id: CommitId },

    #[error("No such commit: {id}")]
    NoSuchCommit { id: String },

    #[error("Commit prefix {prefix} is ambiguous: matches {}", list(.matches))]
    AmbiguousId {
        prefix: String,
        matches: Vec<CommitId>,
    },

    #[error("Commit {id} is not a child of HEAD {head}")]
    NotAChild { id: CommitId, head: CommitId },

    #[error("Failed to write shadow store at {}: {source}", .path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update working file {}: {source}", .path.display())]
    WorkingWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid prune target: {reason}")]
    PruneTargetInvalid { reason: String },

    #[error("Shadow store is locked by {}", holder_name(.holder))]
    Locked { holder: Option<u32> },

    #[error("Path is outside the repository root: {}", .path.display())]
    PathOutsideRoot { path: PathBuf },

    #[error("{operation} is destructive and requires confirmation")]
    ConfirmationRequired { operation: String },

    #[error("Blob {digest} is missing from the shadow store")]
    MissingBlob { digest: String },

    #[error("Blob {digest} is corrupt")]
    CorruptBlob { digest: String },

    #[error("Corrupt history: {reason}")]
    CorruptHistory { reason: String },

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

impl HistoryError {
    /// Errors the caller can act on without giving up: retry with `force`
    /// after a conflict, or pick a child explicitly after an ambiguous redo.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HistoryError::Conflict(_) | HistoryError::AmbiguousRedo { .. }
        )
    }

    pub(crate) fn store_write(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| HistoryError::StoreWrite { path, source }
    }

    pub(crate) fn working_write(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| HistoryError::WorkingWrite { path, source }
    }
}

fn at(head: &Option<CommitId>) -> String {
    match head {
        Some(id) => id.short().to_string(),
        None => "(empty history)".to_string(),
    }
}

fn holder_name(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!("process {}", pid),
        None => "another process".to_string(),
    }
}

fn list(ids: &[CommitId]) -> String {
    ids.iter()
        .map(|id| id.short())
        .collect::<Vec<_>>()
        .join(", ")
}
