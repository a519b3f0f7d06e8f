//! Integration tests for lode-config
//!
//! These tests verify the config loading pipeline with real files.

use lode_config::{Config, LogLevel};
use tempfile::tempdir;

#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(
        &global,
        r#"
[repository]
description = "laptop"
numcopies = 2

[hashing]
chunk_size = 65536

[sync]
remotes = ["origin", "backup"]

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), None).unwrap();
    assert_eq!(config.repository.description, "laptop");
    assert_eq!(config.repository.numcopies, 2);
    assert_eq!(config.hashing.chunk_size, 65536);
    assert_eq!(config.sync.remotes, vec!["origin", "backup"]);
    assert_eq!(config.log_level(), LogLevel::Debug);
    assert_eq!(config.vcs.git_program, "git");
}

#[test]
fn test_repository_config_overrides_global() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    std::fs::write(
        &global,
        "[repository]\nnumcopies = 3\n\n[vcs]\ngit_program = \"/usr/bin/git\"\n",
    )
    .unwrap();

    let git_dir = temp.path().join(".git");
    let repo = Config::repo_config_path(&git_dir);
    std::fs::create_dir_all(repo.parent().unwrap()).unwrap();
    std::fs::write(&repo, "[repository]\ndescription = \"nas\"\n").unwrap();

    let config = Config::load_from(Some(&global), Some(&repo)).unwrap();
    assert_eq!(config.repository.description, "nas");
    assert_eq!(config.repository.numcopies, 3);
    assert_eq!(config.vcs.git_program, "/usr/bin/git");
}

#[test]
fn test_missing_files_give_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(
        Some(&temp.path().join("absent.toml")),
        Some(&temp.path().join("also-absent.toml")),
    )
    .unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_bad_toml_names_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[repository\n").unwrap();
    let err = Config::load_from(Some(&path), None).unwrap_err();
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn test_full_roundtrip() {
    let mut config = Config::default();
    config.sync.remotes = vec!["origin".to_string()];
    config.repository.numcopies = 4;
    let text = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}
