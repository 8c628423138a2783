//! Shadow edit history
//!
//! Records every change an automated editor makes to a repository as an
//! immutable, content-addressed commit, and lets the user undo, redo or jump
//! to any earlier state without losing a branch of history. The store lives
//! in `.shadow/` under the repository root and is independent of any
//! version control the user runs.
//!
//! ```no_run
//! use history::{History, Operation};
//! use std::path::PathBuf;
//!
//! # fn main() -> history::HistoryResult<()> {
//! let mut history = History::open("/path/to/repo")?;
//! let session = history.begin_edit(&[PathBuf::from("src/lib.rs")])?;
//! // ... rewrite src/lib.rs ...
//! session.commit(Operation::new("replace", "src/lib.rs/parse"))?;
//!
//! history.undo(1, false)?;
//! history.redo(None, false)?;
//! # Ok(())
//! # }
//! ```

mod atomic;
pub mod blob;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod context;
pub mod controller;
pub mod error;
pub mod index;
pub mod journal;
pub mod lease;
pub mod prune;
pub mod store;
pub mod sync;

pub use commit::{Commit, CommitId, Operation, Rewrite};
pub use config::ShadowConfig;
pub use conflict::{Conflict, ConflictCheck, ConflictDetector};
pub use controller::{
    Drift, EditSession, History, HistoryEntry, Interruption, PlannedStep, RecordOutcome, Status,
    Step, TraversalReport,
};
pub use error::{HistoryError, HistoryResult};
pub use index::FileIndex;
pub use prune::{GcReport, HeadReset, PruneManager, PruneReport};
pub use store::{CommitStore, Traversal};
pub use sync::{Snapshot, WorkingStateSync};

/// Directory under the repository root holding the shadow store
pub const STORE_DIR: &str = ".shadow";
