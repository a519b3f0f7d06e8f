//! Repository context.

use std::path::{Path, PathBuf};

use lode_cas::{ObjectStore, OBJECTS_DIR};
use lode_config::{log_branch_info, path::to_slash, Config};
use lode_journal::{Clock, ReplicaId, Timestamp};
use lode_vcs::Vcs;

use crate::branch::MetadataBranch;
use crate::{LodeError, Precondition, Result};

/// Config key holding this replica's id.
pub const REPLICA_CONFIG_KEY: &str = "annex.uuid";

/// Everything an operation needs to act on one replica: the
/// version-control handle, this replica's id, settings, a monotonic clock
/// and the object store.
///
/// Callers must not run two operations against the same repository at
/// once; nothing here locks.
#[derive(Debug)]
pub struct Repo<V: Vcs> {
    pub(crate) vcs: V,
    pub(crate) replica: ReplicaId,
    pub(crate) config: Config,
    pub(crate) clock: Clock,
    pub(crate) store: ObjectStore,
    pub(crate) branch: MetadataBranch,
}

impl<V: Vcs> Repo<V> {
    /// Give the repository behind `vcs` a replica id and a metadata
    /// history.
    ///
    /// An id already recorded in the repository config is reused, so an
    /// interrupted `init` can be rerun.
    pub fn init(mut vcs: V, config: Config, description: Option<&str>) -> Result<Self> {
        let branch = MetadataBranch::new(vcs.git_dir());
        if branch.head(&vcs)?.is_some() {
            return Err(Precondition::AlreadyInitialized.into());
        }

        let replica = match vcs.config_get(REPLICA_CONFIG_KEY)? {
            Some(id) => ReplicaId::parse(&id)?,
            None => {
                let id = ReplicaId::generate();
                vcs.config_set(REPLICA_CONFIG_KEY, id.as_str())?;
                id
            }
        };

        let description = match description {
            Some(d) => d.to_string(),
            None if !config.repository.description.is_empty() => {
                config.repository.description.clone()
            }
            None => default_description(vcs.work_tree()),
        };

        let mut clock = Clock::new();
        branch.initialize(&mut vcs, &replica, &description, clock.now())?;
        let store = ObjectStore::for_git_dir(vcs.git_dir())?;
        log_branch_info!(replica = %replica, "repository initialized");

        Ok(Self {
            vcs,
            replica,
            config,
            clock,
            store,
            branch,
        })
    }

    /// Open an initialized repository.
    pub fn open(vcs: V, config: Config) -> Result<Self> {
        let branch = MetadataBranch::new(vcs.git_dir());
        let Some(id) = vcs.config_get(REPLICA_CONFIG_KEY)? else {
            return Err(Precondition::NotInitialized.into());
        };
        if branch.head(&vcs)?.is_none() {
            return Err(Precondition::NotInitialized.into());
        }
        let replica = ReplicaId::parse(&id)?;
        let store = ObjectStore::for_git_dir(vcs.git_dir())?;
        Ok(Self {
            vcs,
            replica,
            config,
            clock: Clock::new(),
            store,
            branch,
        })
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn vcs_mut(&mut self) -> &mut V {
        &mut self.vcs
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn branch(&self) -> &MetadataBranch {
        &self.branch
    }

    pub fn work_tree(&self) -> &Path {
        self.vcs.work_tree()
    }

    pub(crate) fn now(&mut self) -> Timestamp {
        self.clock.now()
    }

    /// Object store location as seen from the work tree root, e.g.
    /// `.git/annex/objects`.
    pub(crate) fn objects_from_work_tree(&self) -> Result<String> {
        let git_dir = self
            .vcs
            .git_dir()
            .strip_prefix(self.vcs.work_tree())
            .map_err(|_| {
                LodeError::Input(format!(
                    "git dir {} is outside the work tree",
                    self.vcs.git_dir().display()
                ))
            })?;
        Ok(format!("{}/{}", to_slash(git_dir), OBJECTS_DIR))
    }

    /// Absolute path of a work-tree-relative path.
    pub(crate) fn absolute(&self, rel: &str) -> PathBuf {
        self.vcs.work_tree().join(rel)
    }
}

fn default_description(work_tree: &Path) -> String {
    work_tree
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
