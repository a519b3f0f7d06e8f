//! Shared fixtures: replicas backed by the in-memory VCS over temp dirs.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use lode_config::Config;
use lode_repo::Repo;
use lode_vcs::{MemoryVcs, Vcs};
use tempfile::TempDir;

pub struct Replica {
    pub dir: TempDir,
    pub repo: Repo<MemoryVcs>,
}

impl Replica {
    pub fn new(description: &str) -> Self {
        Self::with_config(description, Config::default())
    }

    pub fn with_config(description: &str, config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        let vcs = MemoryVcs::init(dir.path()).unwrap();
        let repo = Repo::init(vcs, config, Some(description)).unwrap();
        Self { dir, repo }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn add(&mut self, rel: &str) {
        let path = self.path(rel);
        self.repo.add(&path).unwrap();
    }

    pub fn commit(&mut self, message: &str) {
        self.repo.vcs_mut().commit_index(message).unwrap();
    }

    pub fn link(&self, rel: &str) -> String {
        fs::read_link(self.path(rel))
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    /// Let this replica fetch from `other` under `name`.
    pub fn add_remote(&mut self, name: &str, other: &Replica) {
        self.repo.vcs_mut().add_remote(name, other.repo.vcs());
    }

    /// Non-hidden entries at the top of the work tree.
    pub fn top_level(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}
