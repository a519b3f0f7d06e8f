//! Exercises `GitVcs` against a real `git` when one is installed.

use std::fs;
use std::process::Command;

use lode_vcs::{FileMergeStrategy, GitVcs, TreeMerge, Vcs};
use tempfile::TempDir;

/// `merge-tree --write-tree` needs git 2.38 or later.
fn git_usable() -> bool {
    let Ok(out) = Command::new("git").arg("--version").output() else {
        return false;
    };
    let text = String::from_utf8_lossy(&out.stdout);
    let version: Vec<u32> = text
        .split_whitespace()
        .nth(2)
        .unwrap_or("0")
        .split('.')
        .take(2)
        .map(|p| p.parse().unwrap_or(0))
        .collect();
    matches!(version.as_slice(), [major, minor] if (*major, *minor) >= (2, 38))
}

fn repo(temp: &TempDir) -> GitVcs {
    let mut vcs = GitVcs::init(temp.path(), "git").unwrap();
    vcs.config_set("user.name", "lode test").unwrap();
    vcs.config_set("user.email", "lode@example.invalid").unwrap();
    vcs
}

#[test]
fn test_metadata_line_roundtrip_and_union_merge() {
    if !git_usable() {
        eprintln!("skipping: git >= 2.38 not available");
        return;
    }
    let temp = TempDir::new().unwrap();
    let mut vcs = repo(&temp);

    let area = temp.path().join(".git/area");
    fs::create_dir_all(area.join("5de/9ee")).unwrap();
    fs::write(area.join("uuid.log"), "u1 first timestamp=1.000000s\n").unwrap();
    let log = ["uuid.log".to_string()];
    let tree = vcs.build_tree(None, &area, &log).unwrap();
    let root = vcs.create_commit(&tree, &[], "root").unwrap();
    vcs.update_ref("refs/heads/git-annex", &root, Some(None)).unwrap();
    assert!(vcs
        .update_ref("refs/heads/git-annex", &root, Some(None))
        .is_err());

    fs::write(area.join("uuid.log"), "u1 first timestamp=1.000000s\nu2 a timestamp=2.000000s\n").unwrap();
    let ours_tree = vcs.build_tree(Some(&root), &area, &log).unwrap();
    let ours = vcs.create_commit(&ours_tree, &[root.clone()], "ours").unwrap();

    fs::write(area.join("uuid.log"), "u1 first timestamp=1.000000s\nu3 b timestamp=3.000000s\n").unwrap();
    let theirs_tree = vcs.build_tree(Some(&root), &area, &log).unwrap();
    let theirs = vcs.create_commit(&theirs_tree, &[root.clone()], "theirs").unwrap();

    let TreeMerge::Clean(merged) = vcs
        .merge_commits(&ours, &theirs, FileMergeStrategy::Union)
        .unwrap()
    else {
        panic!("union merge should be clean");
    };
    let commit = vcs.create_commit(&merged, &[ours, theirs], "merge").unwrap();

    let out = temp.path().join(".git/out");
    vcs.checkout(&commit.0, &[], &out).unwrap();
    let text = fs::read_to_string(out.join("uuid.log")).unwrap();
    assert!(text.contains("u2 a"));
    assert!(text.contains("u3 b"));
    assert_eq!(
        vcs.merge_commits(&commit, &root, FileMergeStrategy::Union)
            .unwrap(),
        TreeMerge::UpToDate
    );
}

#[test]
fn test_config_and_branch() {
    if !git_usable() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let mut vcs = repo(&temp);
    assert_eq!(vcs.config_get("annex.uuid").unwrap(), None);
    vcs.config_set("annex.uuid", "u1").unwrap();
    assert_eq!(vcs.config_get("annex.uuid").unwrap(), Some("u1".to_string()));
    assert!(vcs.remote_names().unwrap().is_empty());

    fs::write(temp.path().join("f"), "x").unwrap();
    vcs.stage("f").unwrap();
    assert!(vcs.is_dirty().unwrap());
    vcs.commit_index("add f").unwrap();
    assert!(!vcs.is_dirty().unwrap());
    assert!(vcs.current_branch().unwrap().is_some());
}

#[test]
fn test_build_tree_changes_only_named_paths() {
    if !git_usable() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let mut vcs = repo(&temp);

    let area = temp.path().join(".git/area");
    fs::create_dir_all(area.join("5de/9ee")).unwrap();
    fs::write(area.join("uuid.log"), "u1 first timestamp=1.000000s\n").unwrap();
    fs::write(area.join("5de/9ee/k1.log"), "1.000000s 1 u1\n").unwrap();
    fs::write(area.join("5de/9ee/k2.log"), "1.000000s 1 u1\n").unwrap();
    let all = [
        "uuid.log".to_string(),
        "5de/9ee/k1.log".to_string(),
        "5de/9ee/k2.log".to_string(),
    ];
    let tree = vcs.build_tree(None, &area, &all).unwrap();
    let base = vcs.create_commit(&tree, &[], "base").unwrap();

    // A fresh area holding one edited log and nothing else.
    let edit = temp.path().join(".git/edit");
    fs::create_dir_all(edit.join("5de/9ee")).unwrap();
    fs::write(edit.join("5de/9ee/k1.log"), "2.000000s 0 u1\n").unwrap();
    fs::write(edit.join("stray"), "not staged").unwrap();
    let paths = ["5de/9ee/k1.log".to_string(), "5de/9ee/k2.log".to_string()];
    let tree = vcs.build_tree(Some(&base), &edit, &paths).unwrap();
    let next = vcs.create_commit(&tree, &[base], "edit").unwrap();

    let out = temp.path().join(".git/out");
    vcs.checkout(&next.0, &[], &out).unwrap();
    assert_eq!(
        fs::read_to_string(out.join("uuid.log")).unwrap(),
        "u1 first timestamp=1.000000s\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("5de/9ee/k1.log")).unwrap(),
        "2.000000s 0 u1\n"
    );
    assert!(!out.join("5de/9ee/k2.log").exists());
    assert!(!out.join("stray").exists());

    let some = temp.path().join(".git/some");
    vcs.checkout(&next.0, &["uuid.log".to_string()], &some).unwrap();
    assert!(some.join("uuid.log").exists());
    assert!(!some.join("5de").exists());
}
