use chrono::Utc;
use clap::Parser;
use history::{History, Operation};
use shadow::{render, run_recorded, Cli, Commands, PruneTarget};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut history = History::open(&cli.root)?;

    let result = run(&mut history, cli.command).await;

    if let Some(interruption) = history.take_recovered() {
        match interruption.entry {
            Some(entry) if !interruption.restored.is_empty() => eprintln!(
                "note: an earlier {} was interrupted; restored {} files to match HEAD",
                entry.operation,
                interruption.restored.len()
            ),
            Some(entry) => eprintln!(
                "note: an earlier {} was interrupted; run `shadow status` to check {} files",
                entry.operation,
                entry.paths.len()
            ),
            None => eprintln!("note: an earlier operation was interrupted"),
        }
    }

    result
}

async fn run(history: &mut History, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Exec {
            files,
            kind,
            target,
            message,
            workflow,
            command,
        } => {
            let mut operation = Operation::new(kind, target.unwrap_or_else(|| command.join(" ")));
            if let Some(message) = message {
                operation = operation.with_message(message);
            }
            if let Some(workflow) = workflow {
                operation = operation.with_workflow(workflow);
            }

            let outcome = run_recorded(history, &files, operation, &command).await?;
            print!("{}", render::record(&outcome.record));
            if !outcome.status.success() {
                warn!("Command exited with {}", outcome.status);
                std::process::exit(outcome.status.code().unwrap_or(1));
            }
        }
        Commands::Undo {
            count,
            force,
            dry_run,
        } => {
            if dry_run {
                print!("{}", render::plan(&history.preview_undo(count)?));
            } else {
                let report = history.undo(count, force)?;
                print!("{}", render::traversal(&report));
                if let Some(failure) = report.failure {
                    return Err(failure.into());
                }
            }
        }
        Commands::Redo { target, force } => {
            let step = history.redo(target.as_deref(), force)?;
            print!("{}", render::step(&step));
        }
        Commands::Goto { commit, force } => {
            let report = history.goto(&commit, force)?;
            print!("{}", render::traversal(&report));
            if let Some(failure) = report.failure {
                return Err(failure.into());
            }
        }
        Commands::History { path, all, json } => {
            let entries = history.history(path.as_deref(), all)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", render::history(&entries));
            }
        }
        Commands::Diff { commit } => {
            print!("{}", history.diff(&commit)?);
        }
        Commands::Status => {
            print!("{}", render::status(&history.status()?));
        }
        Commands::Prune { target } => {
            let report = match target {
                PruneTarget::Range { from, to, yes } => history.prune_range(&from, &to, yes)?,
                PruneTarget::File { path, yes } => history.prune_file(&path, yes)?,
            };
            print!("{}", render::prune(&report));
        }
        Commands::Gc { yes } => {
            let report = history.gc(Utc::now(), yes)?;
            print!("{}", render::gc(&report));
        }
    }

    Ok(())
}
