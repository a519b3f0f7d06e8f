//! Runs the `lode` binary in scratch directories.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn lode(dir: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lode"))
        .current_dir(dir)
        .env("HOME", home)
        .env_remove("LODE_LOG")
        .env_remove("LODE_LOG_LEVEL")
        .env_remove("LODE_NUMCOPIES")
        .env("GIT_AUTHOR_NAME", "lode test")
        .env("GIT_AUTHOR_EMAIL", "lode@example.invalid")
        .env("GIT_COMMITTER_NAME", "lode test")
        .env("GIT_COMMITTER_EMAIL", "lode@example.invalid")
        .args(args)
        .output()
        .expect("failed to run lode")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

#[test]
fn config_show_is_valid_toml() {
    let temp = TempDir::new().unwrap();
    let out = lode(temp.path(), temp.path(), &["config", "show"]);
    assert!(out.status.success());

    let parsed: lode_config::Config = toml::from_str(&stdout(&out)).unwrap();
    assert_eq!(parsed, lode_config::Config::default());
}

#[test]
fn calckey_works_outside_a_repository() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("file3.foo.bar"), "file3.foo.bar data\n").unwrap();
    let out = lode(temp.path(), temp.path(), &["calckey", "file3.foo.bar"]);
    assert!(out.status.success());
    assert_eq!(
        stdout(&out).trim(),
        "SHA256E-s19--4a564ca152514a6cf577dc0ba25098e4f24431ff905c10436b394aa8987849d0.foo.bar"
    );
}

#[test]
fn failure_prints_one_diagnostic_line() {
    let temp = TempDir::new().unwrap();
    let out = lode(temp.path(), temp.path(), &["uuid"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("lode: uuid: "), "{}", stderr);
    assert_eq!(stderr.trim_end().lines().count(), 1);
}

#[cfg(unix)]
#[test]
fn init_add_whereis_in_git_repository() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let temp = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    let work = temp.path();
    let status = Command::new("git")
        .current_dir(work)
        .args(["init", "-q"])
        .status()
        .unwrap();
    assert!(status.success());

    let out = lode(work, home.path(), &["init", "laptop"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let again = lode(work, home.path(), &["init"]);
    assert_eq!(again.status.code(), Some(1));

    fs::write(work.join("file1"), "file1 data\n").unwrap();
    let out = lode(work, home.path(), &["add", "file1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "add file1 ok\n");
    let target = fs::read_link(work.join("file1")).unwrap();
    assert!(target.starts_with(".git/annex/objects/5de/9ee"));

    let uuid = stdout(&lode(work, home.path(), &["uuid"])).trim().to_string();
    let out = lode(work, home.path(), &["whereis", "file1"]);
    assert!(stdout(&out).contains(&format!("{} -- laptop [here]", uuid)));

    let out = lode(work, home.path(), &["repos"]);
    assert!(stdout(&out).contains("[here]"));

    let out = lode(work, home.path(), &["drop", "file1"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not enough copies"));

    let key = "SHA256E-s11--5eb788ac2bded6ce7112e44d68228bfecb3e569d1d745c78e1275986bbedc3cf";
    let location = format!(".git/annex/objects/5de/9ee/{0}/{0}\n", key);
    let out = lode(work, home.path(), &["contentlocation", key]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), location);

    let out = lode(work, home.path(), &["drop", "--force", "file1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let out = lode(work, home.path(), &["contentlocation", key]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), location);
    assert!(!work.join(location.trim_end()).exists());
}
