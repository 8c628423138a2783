//! Wrap an external editing command as a recorded edit

use history::{History, HistoryError, Operation, RecordOutcome};
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("No command given")]
    EmptyCommand,

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    History(#[from] HistoryError),
}

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug)]
pub struct ExecOutcome {
    pub status: ExitStatus,
    pub record: RecordOutcome,
}

/// Snapshot `files`, run `command`, and record whatever it changed. The
/// edit is recorded even when the command fails so it can be undone.
pub async fn run_recorded(
    history: &mut History,
    files: &[PathBuf],
    operation: Operation,
    command: &[String],
) -> ExecResult<ExecOutcome> {
    let (program, args) = command.split_first().ok_or(ExecError::EmptyCommand)?;
    let command_line = command.join(" ");
    let root = history.root().to_path_buf();

    let session = history.begin_edit(files)?;
    info!("Running {} on {} files", command_line, session.paths().len());
    let status = match Command::new(program)
        .args(args)
        .current_dir(&root)
        .status()
        .await
    {
        Ok(status) => status,
        Err(source) => {
            session.abandon();
            return Err(ExecError::Spawn {
                command: command_line,
                source,
            });
        }
    };
    if !status.success() {
        warn!("{} exited with {}", command_line, status);
    }

    let record = session.commit(operation)?;
    Ok(ExecOutcome { status, record })
}
