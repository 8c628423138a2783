use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shadow")]
#[command(about = "Undo, redo and navigate the history of automated edits")]
pub struct Cli {
    /// Repository root holding the .shadow store
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command that edits files and record its changes as one edit
    Exec {
        /// Files the command may change
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Operation kind to record
        #[arg(long, default_value = "exec")]
        kind: String,
        /// Target descriptor (defaults to the command line)
        #[arg(long)]
        target: Option<String>,
        /// Message stored with the edit
        #[arg(short, long)]
        message: Option<String>,
        /// Workflow the edit belongs to
        #[arg(long)]
        workflow: Option<String>,
        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Revert the most recent edits
    Undo {
        /// Number of edits to revert
        #[arg(default_value = "1")]
        count: usize,
        /// Overwrite files even if they changed since the edit
        #[arg(short, long)]
        force: bool,
        /// Show what would be reverted without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Reapply an undone edit
    Redo {
        /// Child to redo into when HEAD is a branch point
        target: Option<String>,
        #[arg(short, long)]
        force: bool,
    },
    /// Move to any recorded state
    Goto {
        /// Commit id or unique prefix
        commit: String,
        #[arg(short, long)]
        force: bool,
    },
    /// List recorded edits, newest first
    History {
        /// Only edits touching this file
        path: Option<PathBuf>,
        /// Include every branch, not just HEAD's line
        #[arg(short, long)]
        all: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the changes made by one edit
    Diff {
        commit: String,
    },
    /// Show HEAD and files that drifted from it
    Status,
    /// Permanently remove edits from history
    Prune {
        #[command(subcommand)]
        target: PruneTarget,
    },
    /// Collect abandoned branches and unreferenced content
    Gc {
        /// Confirm the removal
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PruneTarget {
    /// Remove TO and its ancestors up to and including FROM
    Range {
        from: String,
        to: String,
        /// Confirm the removal
        #[arg(short, long)]
        yes: bool,
    },
    /// Erase every trace of a file
    File {
        path: PathBuf,
        /// Confirm the removal
        #[arg(short, long)]
        yes: bool,
    },
}
