//! Commit records
//!
//! A commit is one atomic multi-file change plus the operation that produced
//! it. Its id is the SHA-256 of its parent, operation and patch set, so the
//! same change recorded twice from the same parent lands on the same id.

use crate::error::HistoryResult;
use chrono::{DateTime, Utc};
use patchset::PatchSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Operation kind recorded on the implicit root commit
pub const ROOT_KIND: &str = "root";

/// Content-addressed commit identifier (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub(crate) fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What the editing engine did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation kind, e.g. "replace", "insert", "delete"
    pub kind: String,
    /// Target descriptor, e.g. "src/lib.rs/Parser::parse"
    pub target: String,
    /// Optional human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Workflow the edit ran under, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

impl Operation {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            message: None,
            workflow: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn root() -> Self {
        Self::new(ROOT_KIND, "")
    }

    pub fn is_root(&self) -> bool {
        self.kind == ROOT_KIND
    }

    /// One-line summary: "kind target"
    pub fn describe(&self) -> String {
        if self.target.is_empty() {
            self.kind.clone()
        } else {
            format!("{} {}", self.kind, self.target)
        }
    }
}

/// Marker left on a commit whose record was rewritten by a prune
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    pub at: DateTime<Utc>,
    /// Removed commits whose changes were folded into this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folded: Vec<CommitId>,
    /// Number of file entries stripped from this commit
    #[serde(default)]
    pub stripped_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub patch_set: PatchSet,
    /// Short HEAD of the user's own repository when the edit was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<Rewrite>,
}

#[derive(Serialize)]
struct IdInput<'a> {
    parent: Option<&'a CommitId>,
    operation: &'a Operation,
    patch_set: &'a PatchSet,
}

impl Commit {
    pub fn new(
        parent: Option<CommitId>,
        operation: Operation,
        patch_set: PatchSet,
        timestamp: DateTime<Utc>,
        git_head: Option<String>,
    ) -> HistoryResult<Self> {
        let id = Self::compute_id(parent.as_ref(), &operation, &patch_set)?;
        Ok(Self {
            id,
            parent,
            timestamp,
            operation,
            patch_set,
            git_head,
            rewrite: None,
        })
    }

    /// Hash of parent, operation and patch set. Timestamp and context are
    /// descriptive and do not take part.
    pub fn compute_id(
        parent: Option<&CommitId>,
        operation: &Operation,
        patch_set: &PatchSet,
    ) -> HistoryResult<CommitId> {
        let canonical = serde_json::to_vec(&IdInput {
            parent,
            operation,
            patch_set,
        })?;
        Ok(CommitId(hex::encode(Sha256::digest(&canonical))))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.patch_set.paths()
    }

    pub fn file_list(&self) -> Vec<PathBuf> {
        self.files().map(Path::to_path_buf).collect()
    }
}
