//! Synchronizing with remotes.

use lode_config::{log_merge_info, log_merge_warn};
use lode_vcs::{remote_ref, MergeOutcome, Vcs};

use crate::branch::{BranchMerge, METADATA_BRANCH};
use crate::resolve::Resolution;
use crate::{LodeError, Precondition, Repo, Result};

/// What happened with one remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSync {
    pub remote: String,
    pub metadata: BranchMerge,
    /// `None` when the remote has no counterpart of the current branch.
    pub main: Option<MergeOutcome>,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub remotes: Vec<RemoteSync>,
}

impl<V: Vcs> Repo<V> {
    /// Fetch each remote, union-merge its metadata history, merge its copy
    /// of the current branch, and repair add/add conflicts that leaves.
    ///
    /// `remotes` selects the remotes; when empty the configured list is
    /// used, and when that is empty too every known remote.
    pub fn sync(&mut self, remotes: &[String]) -> Result<SyncReport> {
        if self.vcs.is_dirty()? {
            return Err(Precondition::UncommittedChanges.into());
        }

        let known = self.vcs.remote_names()?;
        let targets: Vec<String> = if !remotes.is_empty() {
            remotes.to_vec()
        } else if !self.config.sync.remotes.is_empty() {
            self.config.sync.remotes.clone()
        } else {
            known.iter().cloned().collect()
        };
        if let Some(unknown) = targets.iter().find(|r| !known.contains(*r)) {
            return Err(LodeError::Input(format!("unknown remote: {}", unknown)));
        }

        let branch = self.vcs.current_branch()?;
        let mut report = SyncReport::default();
        for remote in targets {
            let synced = self.sync_remote(&remote, branch.as_deref())?;
            report.remotes.push(synced);
        }
        Ok(report)
    }

    fn sync_remote(&mut self, remote: &str, branch: Option<&str>) -> Result<RemoteSync> {
        self.vcs.fetch(remote)?;

        let metadata = self
            .branch
            .merge(&mut self.vcs, &remote_ref(remote, METADATA_BRANCH))?;

        let mut main = None;
        let mut resolution = None;
        if let Some(branch) = branch {
            let theirs = remote_ref(remote, branch);
            if self.vcs.resolve(&theirs)?.is_some() {
                let outcome = self.vcs.merge_into_head(&theirs)?;
                if let MergeOutcome::Conflicted(paths) = &outcome {
                    log_merge_warn!(remote = remote, conflicts = paths.len(), "merge conflicted");
                    resolution = self.resolve_conflicts()?;
                }
                main = Some(outcome);
            }
        }

        log_merge_info!(remote = remote, metadata = ?metadata, main = ?main, "synced");
        Ok(RemoteSync {
            remote: remote.to_string(),
            metadata,
            main,
            resolution,
        })
    }
}
