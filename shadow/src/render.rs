//! Plain-text summaries printed by the command line

use chrono::Local;
use history::{
    GcReport, HistoryEntry, PlannedStep, PruneReport, RecordOutcome, Status, Step,
    TraversalReport,
};
use patchset::Direction;
use std::fmt::Write;
use std::path::PathBuf;

fn file_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn record(outcome: &RecordOutcome) -> String {
    match outcome {
        RecordOutcome::Recorded { id, files } => {
            format!("Recorded {} ({})\n", id.short(), file_list(files))
        }
        RecordOutcome::Unchanged => "No files changed; nothing recorded\n".to_string(),
        RecordOutcome::Disabled => "Shadow tracking is disabled; nothing recorded\n".to_string(),
    }
}

pub fn step(step: &Step) -> String {
    let verb = match step.direction {
        Direction::Reverse => "Reverted",
        Direction::Forward => "Applied",
    };
    format!("{} {} ({})\n", verb, step.commit.short(), file_list(&step.files))
}

pub fn traversal(report: &TraversalReport) -> String {
    let mut out = String::new();
    for s in &report.steps {
        out.push_str(&step(s));
    }
    if let Some(failure) = &report.failure {
        let _ = writeln!(
            out,
            "Stopped after {} of {} steps: {}",
            report.completed(),
            report.planned,
            failure
        );
    }
    match &report.head {
        Some(head) => {
            let _ = writeln!(out, "HEAD is now {}", head.short());
        }
        None => out.push_str("History is empty\n"),
    }
    out
}

pub fn plan(steps: &[PlannedStep]) -> String {
    if steps.is_empty() {
        return "Nothing to undo\n".to_string();
    }
    let mut out = String::new();
    for s in steps {
        let _ = writeln!(
            out,
            "Would revert {} {} ({})",
            s.commit.short(),
            s.operation.describe(),
            file_list(&s.files)
        );
        if let Some(conflict) = &s.conflict {
            let _ = writeln!(out, "  blocked: {}", conflict);
        }
    }
    out
}

pub fn history(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let marker = if entry.is_head { "*" } else { " " };
        let mut flags = Vec::new();
        if entry.is_root {
            flags.push("root".to_string());
        }
        if entry.is_branch_point() {
            flags.push(format!("{} branches", entry.children));
        }
        if entry.rewritten {
            flags.push("rewritten".to_string());
        }
        if let Some(git) = &entry.git_head {
            flags.push(format!("git {}", git));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        let _ = writeln!(
            out,
            "{} {} {} {}{}",
            marker,
            entry.id.short(),
            entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            entry.operation.describe(),
            flags
        );
        if let Some(message) = &entry.operation.message {
            let _ = writeln!(out, "      {}", message);
        }
        if !entry.files.is_empty() {
            let _ = writeln!(out, "      {}", file_list(&entry.files));
        }
    }
    out
}

pub fn status(status: &Status) -> String {
    let mut out = String::new();
    match &status.head {
        Some(head) => {
            let _ = writeln!(out, "HEAD {}", head.short());
        }
        None => out.push_str("No history yet\n"),
    }
    let _ = writeln!(
        out,
        "{} edits, {} branch points",
        status.edit_count, status.branch_points
    );
    if status.drift.is_empty() {
        out.push_str("Working files match HEAD\n");
    } else {
        out.push_str("Changed since HEAD:\n");
        for drift in &status.drift {
            let _ = writeln!(
                out,
                "  {} (expected {}, found {})",
                drift.path.display(),
                drift.expected,
                drift.actual
            );
        }
    }
    out
}

pub fn prune(report: &PruneReport) -> String {
    let mut out = format!(
        "Removed {} commits, rewrote {}, deleted {} blobs\n",
        report.removed.len(),
        report.rewritten.len(),
        report.blobs_removed
    );
    if let Some(reset) = &report.head_reset {
        let _ = writeln!(
            out,
            "warning: HEAD {} was removed; HEAD is now {}. Working files were not changed.",
            reset.from.short(),
            reset.to.short()
        );
    }
    out
}

pub fn gc(report: &GcReport) -> String {
    format!(
        "Collected {} commits from abandoned branches and {} unreferenced blobs\n",
        report.removed.len(),
        report.blobs_removed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use history::{History, Operation};
    use std::fs;
    use tempfile::TempDir;

    fn recorded_history(dir: &TempDir) -> History {
        let mut history = History::open(dir.path()).unwrap();
        let session = history.begin_edit(&[PathBuf::from("a.txt")]).unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        session
            .commit(Operation::new("insert", "a.txt").with_message("first line"))
            .unwrap();
        history
    }

    #[test]
    fn test_history_marks_head_and_root() {
        let dir = TempDir::new().unwrap();
        let mut history = recorded_history(&dir);
        let text = super::history(&history.history(None, false).unwrap());

        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("* "));
        assert!(lines[0].contains("insert a.txt"));
        assert!(text.contains("first line"));
        assert!(text.contains("[root]"));
    }

    #[test]
    fn test_traversal_reports_partial_stop() {
        let dir = TempDir::new().unwrap();
        let mut history = recorded_history(&dir);
        fs::write(dir.path().join("a.txt"), "changed").unwrap();

        let plan_text = plan(&history.preview_undo(1).unwrap());
        assert!(plan_text.contains("blocked"));

        let report = history.undo(1, true).unwrap();
        let text = traversal(&report);
        assert!(text.starts_with("Reverted"));
        assert!(text.contains("HEAD is now"));
    }

    #[test]
    fn test_status_lists_drift() {
        let dir = TempDir::new().unwrap();
        let mut history = recorded_history(&dir);
        assert!(status(&history.status().unwrap()).contains("Working files match HEAD"));

        fs::write(dir.path().join("a.txt"), "y").unwrap();
        let text = status(&history.status().unwrap());
        assert!(text.contains("Changed since HEAD"));
        assert!(text.contains("a.txt"));
    }

    #[test]
    fn test_record_outcomes() {
        assert!(record(&RecordOutcome::Unchanged).contains("nothing recorded"));
        assert!(record(&RecordOutcome::Disabled).contains("disabled"));
    }
}
