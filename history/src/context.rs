//! Read-only context from the user's own git repository

use git2::Repository;
use std::path::Path;
use tracing::debug;

/// Length of the abbreviated commit hash recorded on each edit
pub const SHORT_SHA_LEN: usize = 7;

/// Short hash of the commit HEAD points at in the repository at `root`, if
/// `root` is a git repository with at least one commit. The repository is
/// only ever read.
pub fn read_git_head(root: &Path) -> Option<String> {
    let repo = match Repository::open(root) {
        Ok(repo) => repo,
        Err(e) => {
            debug!("No git repository at {}: {}", root.display(), e.message());
            return None;
        }
    };
    let oid = repo.head().ok()?.target()?;
    let hex = oid.to_string();
    Some(hex[..SHORT_SHA_LEN.min(hex.len())].to_string())
}
