use chrono::{Duration, Utc};
use history::{
    CommitId, History, HistoryError, Operation, RecordOutcome, ShadowConfig, STORE_DIR,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Repo {
    dir: TempDir,
    history: History,
}

impl Repo {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let history = History::open(dir.path()).unwrap();
        Self { dir, history }
    }

    fn with_config(config: ShadowConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let history = History::open_with_config(dir.path(), config).unwrap();
        Self { dir, history }
    }

    fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.dir.path().join(path)).ok()
    }

    /// Apply `changes` as one recorded edit; `None` deletes the file
    fn edit(&mut self, changes: &[(&str, Option<&str>)]) -> CommitId {
        let paths: Vec<PathBuf> = changes.iter().map(|(p, _)| PathBuf::from(p)).collect();
        let root = self.dir.path().to_path_buf();
        let session = self.history.begin_edit(&paths).unwrap();
        for (path, content) in changes {
            let full = root.join(path);
            match content {
                Some(content) => {
                    fs::create_dir_all(full.parent().unwrap()).unwrap();
                    fs::write(full, content).unwrap();
                }
                None => fs::remove_file(full).unwrap(),
            }
        }
        match session
            .commit(Operation::new("replace", changes[0].0))
            .unwrap()
        {
            RecordOutcome::Recorded { id, .. } => id,
            other => panic!("edit was not recorded: {:?}", other),
        }
    }

    fn set(&mut self, path: &str, content: &str) -> CommitId {
        self.edit(&[(path, Some(content))])
    }

    fn head(&self) -> CommitId {
        self.history.head().cloned().unwrap()
    }

    fn parent_of(&self, id: &CommitId) -> CommitId {
        self.history
            .store()
            .get(id)
            .unwrap()
            .parent
            .clone()
            .unwrap()
    }
}

#[test]
fn test_scenario_insert_undo_redo() {
    let mut repo = Repo::new();
    repo.write("a.txt", "");
    repo.set("a.txt", "x");

    repo.history.undo(1, false).unwrap();
    assert_eq!(repo.read("a.txt").as_deref(), Some(""));

    repo.history.redo(None, false).unwrap();
    assert_eq!(repo.read("a.txt").as_deref(), Some("x"));
}

#[test]
fn test_scenario_branch_then_ambiguous_redo() {
    let mut repo = Repo::new();
    repo.write("a.txt", "");
    let first = repo.set("a.txt", "x");
    let second = repo.set("a.txt", "xy");

    let report = repo.history.undo(1, false).unwrap();
    assert!(report.is_complete());
    assert_eq!(repo.read("a.txt").as_deref(), Some("x"));
    assert_eq!(repo.head(), first);

    let third = repo.set("a.txt", "xz");
    let children = repo.history.store().children_of(&first);
    assert_eq!(children.len(), 2);
    assert!(children.contains(&second) && children.contains(&third));

    repo.history.undo(1, false).unwrap();
    match repo.history.redo(None, false) {
        Err(HistoryError::AmbiguousRedo { head, candidates }) => {
            assert_eq!(head, first);
            assert!(candidates.contains(&second));
            assert!(candidates.contains(&third));
        }
        other => panic!("expected AmbiguousRedo, got {:?}", other),
    }
    assert_eq!(repo.read("a.txt").as_deref(), Some("x"));
}

#[test]
fn test_scenario_conflict_then_force() {
    let mut repo = Repo::new();
    repo.write("a.txt", "");
    let edit = repo.set("a.txt", "x");
    repo.write("a.txt", "z");

    match repo.history.undo(1, false) {
        Err(HistoryError::Conflict(conflict)) => {
            assert_eq!(conflict.commit, edit);
            assert_eq!(conflict.path, PathBuf::from("a.txt"));
        }
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert_eq!(repo.read("a.txt").as_deref(), Some("z"));
    assert_eq!(repo.head(), edit);

    repo.history.undo(1, true).unwrap();
    assert_eq!(repo.read("a.txt").as_deref(), Some(""));
}

#[test]
fn test_scenario_multi_file_undo_is_atomic() {
    let mut repo = Repo::new();
    let edit = repo.edit(&[("a.rs", Some("fn a() {}")), ("b.rs", Some("fn b() {}"))]);
    repo.write("b.rs", "fn b() { changed }");

    let err = repo.history.undo(1, false).unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("b.rs"));
    assert_eq!(repo.read("a.rs").as_deref(), Some("fn a() {}"));
    assert_eq!(repo.read("b.rs").as_deref(), Some("fn b() { changed }"));
    assert_eq!(repo.head(), edit);
}

#[test]
fn test_scenario_prune_range_resets_head() {
    let mut repo = Repo::new();
    let a = repo.set("a.txt", "a");
    let b = repo.set("a.txt", "ab");
    let c = repo.set("a.txt", "abc");

    let report = repo
        .history
        .prune_range(b.as_str(), c.as_str(), true)
        .unwrap();
    assert_eq!(report.removed.len(), 2);
    let reset = report.head_reset.unwrap();
    assert_eq!((reset.from, reset.to), (c.clone(), a.clone()));
    assert_eq!(repo.head(), a);
    assert_eq!(repo.read("a.txt").as_deref(), Some("abc"));

    let listed: Vec<CommitId> = repo
        .history
        .history(None, true)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert!(!listed.contains(&b));
    assert!(!listed.contains(&c));
    assert!(listed.contains(&a));

    let reopened = History::open(repo.dir.path()).unwrap();
    assert_eq!(reopened.head(), Some(&a));
}

#[test]
fn test_undo_all_restores_pre_edit_content() {
    let mut repo = Repo::new();
    repo.write("keep.txt", "original\n");
    repo.write("gone.txt", "to be deleted\n");

    repo.edit(&[("keep.txt", Some("first\n")), ("new.txt", Some("created\n"))]);
    repo.edit(&[("gone.txt", None)]);
    repo.edit(&[("keep.txt", Some("second\n")), ("new.txt", Some("changed\n"))]);
    repo.edit(&[("nested/deep.txt", Some("deep\n"))]);

    let report = repo.history.undo(4, false).unwrap();
    assert_eq!(report.completed(), 4);
    assert!(report.is_complete());

    assert_eq!(repo.read("keep.txt").as_deref(), Some("original\n"));
    assert_eq!(repo.read("gone.txt").as_deref(), Some("to be deleted\n"));
    assert_eq!(repo.read("new.txt"), None);
    assert_eq!(repo.read("nested/deep.txt"), None);
    assert!(repo.history.store().get(&repo.head()).unwrap().is_root());

    assert!(matches!(
        repo.history.undo(1, false),
        Err(HistoryError::NoHistory { head: Some(_) })
    ));
}

#[test]
fn test_redo_after_undo_round_trips() {
    let mut repo = Repo::new();
    let bytes = "binary\0\u{7f}content";
    repo.write("data.bin", "seed");
    let edit = repo.set("data.bin", bytes);

    repo.history.undo(1, false).unwrap();
    assert_eq!(repo.read("data.bin").as_deref(), Some("seed"));
    let step = repo.history.redo(None, false).unwrap();
    assert_eq!(step.commit, edit);
    assert_eq!(repo.read("data.bin").as_deref(), Some(bytes));

    assert!(matches!(
        repo.history.redo(None, false),
        Err(HistoryError::NoForwardHistory { .. })
    ));
}

#[test]
fn test_multi_step_undo_reports_partial_progress() {
    let mut repo = Repo::new();
    let first = repo.set("a.txt", "1");
    repo.set("b.txt", "2");
    repo.set("c.txt", "3");
    repo.write("a.txt", "edited by hand");

    let report = repo.history.undo(3, false).unwrap();
    assert_eq!(report.completed(), 2);
    assert_eq!(report.planned, 3);
    assert!(matches!(report.failure, Some(HistoryError::Conflict(_))));
    assert_eq!(report.head, Some(first.clone()));
    assert_eq!(repo.head(), first);
    assert_eq!(repo.read("b.txt"), None);
    assert_eq!(repo.read("a.txt").as_deref(), Some("edited by hand"));
}

#[test]
fn test_new_edit_keeps_old_branch_reachable() {
    let mut repo = Repo::new();
    repo.set("a.txt", "x");
    let old_leaf = repo.set("a.txt", "xy");
    repo.history.undo(1, false).unwrap();
    let new_leaf = repo.set("a.txt", "xz");

    let report = repo.history.goto(&old_leaf.as_str()[..10], false).unwrap();
    assert_eq!(report.completed(), 2);
    assert_eq!(report.steps[0].commit, new_leaf);
    assert_eq!(repo.read("a.txt").as_deref(), Some("xy"));
    assert_eq!(repo.head(), old_leaf);

    repo.history.goto(new_leaf.as_str(), false).unwrap();
    assert_eq!(repo.read("a.txt").as_deref(), Some("xz"));
}

#[test]
fn test_goto_stops_at_conflict() {
    let mut repo = Repo::new();
    let base = repo.set("a.txt", "x");
    repo.set("b.txt", "b");
    let tip = repo.set("a.txt", "xy");
    repo.write("b.txt", "diverged");

    let report = repo.history.goto(base.as_str(), false).unwrap();
    assert_eq!(report.completed(), 1);
    assert!(!report.is_complete());
    assert_eq!(repo.head(), repo.parent_of(&tip));
    assert_eq!(repo.read("a.txt").as_deref(), Some("x"));
    assert_eq!(repo.read("b.txt").as_deref(), Some("diverged"));

    assert!(matches!(
        repo.history.goto("deadbeef", false),
        Err(HistoryError::NoSuchCommit { .. })
    ));
}

#[test]
fn test_redo_into_chosen_child() {
    let mut repo = Repo::new();
    let base = repo.set("a.txt", "x");
    let left = repo.set("a.txt", "left");
    repo.history.undo(1, false).unwrap();
    let right = repo.set("a.txt", "right");
    repo.history.undo(1, false).unwrap();

    let step = repo.history.redo(Some(&left.as_str()[..8]), false).unwrap();
    assert_eq!(step.commit, left);
    assert_eq!(repo.read("a.txt").as_deref(), Some("left"));

    assert!(matches!(
        repo.history.redo(Some(right.as_str()), false),
        Err(HistoryError::NotAChild { .. })
    ));
    assert_ne!(base, right);
}

#[test]
fn test_preview_undo_changes_nothing() {
    let mut repo = Repo::new();
    repo.set("a.txt", "x");
    let second = repo.set("a.txt", "xy");
    let third = repo.set("b.txt", "b");
    repo.write("a.txt", "hand edit");

    let plan = repo.history.preview_undo(5).unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[0].commit, third);
    assert!(plan[0].conflict.is_none());
    assert_eq!(plan[1].commit, second);
    let conflict = plan[1].conflict.as_ref().unwrap();
    assert_eq!(conflict.path, PathBuf::from("a.txt"));
    assert!(plan[2].conflict.is_none());

    assert_eq!(repo.head(), third);
    assert_eq!(repo.read("b.txt").as_deref(), Some("b"));
}

#[test]
fn test_history_listing() {
    let mut repo = Repo::new();
    let a = repo.set("a.txt", "x");
    let b = repo.set("b.txt", "y");
    let c = repo.set("a.txt", "xy");
    repo.history.undo(1, false).unwrap();
    let side = repo.set("b.txt", "yz");

    let line = repo.history.history(None, false).unwrap();
    let ids: Vec<_> = line.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids[..3], [side.clone(), b.clone(), a.clone()]);
    assert!(line[0].is_head);
    assert!(line.last().unwrap().is_root);
    assert!(line[1].is_branch_point());

    let touching_a: Vec<_> = repo
        .history
        .history(Some(Path::new("a.txt")), false)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(touching_a, vec![a.clone()]);

    let all_a: Vec<_> = repo
        .history
        .history(Some(&repo.dir.path().join("a.txt")), true)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(all_a.len(), 2);
    assert!(all_a.contains(&c));

    assert!(matches!(
        repo.history.history(Some(Path::new("../outside")), false),
        Err(HistoryError::PathOutsideRoot { .. })
    ));
}

#[test]
fn test_diff_renders_commit() {
    let mut repo = Repo::new();
    repo.write("a.txt", "one\ntwo\n");
    let edit = repo.set("a.txt", "one\nthree\n");

    let diff = repo.history.diff(&edit.as_str()[..6]).unwrap();
    assert!(diff.contains("-two"));
    assert!(diff.contains("+three"));
    assert!(diff.contains("a.txt"));
}

#[test]
fn test_status_reports_drift() {
    let mut repo = Repo::new();
    repo.set("a.txt", "x");
    repo.set("b.txt", "y");

    let status = repo.history.status().unwrap();
    assert_eq!(status.edit_count, 2);
    assert_eq!(status.branch_points, 0);
    assert!(status.drift.is_empty());

    repo.write("b.txt", "changed");
    let status = repo.history.status().unwrap();
    assert_eq!(status.drift.len(), 1);
    assert_eq!(status.drift[0].path, PathBuf::from("b.txt"));
}

#[test]
fn test_prune_file_redacts_secret() {
    let mut repo = Repo::new();
    repo.write("lib.rs", "");
    let setup = repo.edit(&[("lib.rs", Some("fn main() {}")), (".env", Some("TOKEN=hunter2"))]);
    repo.set(".env", "TOKEN=rotated");
    let tip = repo.set("lib.rs", "fn main() { run() }");

    let report = repo.history.prune_file(Path::new(".env"), true).unwrap();
    assert_eq!(report.removed.len(), 1);
    assert!(report.head_reset.is_none());
    assert!(report.blobs_removed >= 2);
    assert_eq!(repo.parent_of(&tip), setup);

    for commit in repo.history.store().iter() {
        assert!(!commit.patch_set.touches(Path::new(".env")));
    }
    let store = repo.dir.path().join(STORE_DIR);
    for entry in walk(&store) {
        let content = fs::read(&entry).unwrap();
        assert!(!String::from_utf8_lossy(&content).contains("hunter2"));
    }

    repo.history.undo(2, false).unwrap();
    assert_eq!(repo.read("lib.rs").as_deref(), Some(""));
    assert_eq!(repo.read(".env").as_deref(), Some("TOKEN=rotated"));
}

#[test]
fn test_gc_collects_abandoned_branches() {
    let mut repo = Repo::with_config(ShadowConfig::new().with_retention_days(7));
    let base = repo.set("a.txt", "x");
    let abandoned = repo.set("a.txt", "abandoned");
    repo.history.undo(1, false).unwrap();
    let kept = repo.set("a.txt", "kept");

    let report = repo.history.gc(Utc::now(), true).unwrap();
    assert!(report.removed.is_empty());

    let report = repo
        .history
        .gc(Utc::now() + Duration::days(8), true)
        .unwrap();
    assert_eq!(report.removed, vec![abandoned.clone()]);
    assert_eq!(report.blobs_removed, 1);
    assert!(!repo.history.store().contains(&abandoned));
    assert!(repo.history.store().contains(&kept));
    assert_eq!(repo.history.store().children_of(&base), vec![kept]);
}

#[test]
fn test_history_survives_reopen() {
    let mut repo = Repo::new();
    repo.set("a.txt", "x");
    let head = repo.set("a.txt", "xy");
    let dir = repo.dir;
    drop(repo.history);

    let mut history = History::open(dir.path()).unwrap();
    assert_eq!(history.head(), Some(&head));
    history.undo(1, false).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "x");
}

#[test]
fn test_config_file_disables_tracking() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(STORE_DIR)).unwrap();
    fs::write(
        dir.path().join(STORE_DIR).join("config.toml"),
        "enabled = false\n",
    )
    .unwrap();

    let mut history = History::open(dir.path()).unwrap();
    let session = history.begin_edit(&[PathBuf::from("a.txt")]).unwrap();
    fs::write(dir.path().join("a.txt"), "x").unwrap();
    assert_eq!(
        session.commit(Operation::new("insert", "a.txt")).unwrap(),
        RecordOutcome::Disabled
    );
    assert!(history.store().is_empty());
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}
