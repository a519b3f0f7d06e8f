//! The metadata history line.
//!
//! Location logs, the replica registry and the capability marker live on
//! their own branch, never checked out in the work tree. Each change checks
//! the files it touches out into a private staging directory, edits them
//! there through a [`Journal`], and commits them on top of the old branch
//! head; every other file is carried over from the head unread. The ref
//! moves only after the commit exists, and only if it still points where it
//! did when the edit began.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lode_config::{log_branch_debug, log_branch_info};
use lode_journal::{
    parse_markers, CapabilityMarker, Journal, ReplicaId, ReplicaRecord, Timestamp, MARKER_FILE,
};
use lode_vcs::{CommitId, FileMergeStrategy, TreeMerge, Vcs};
use tempfile::TempDir;
use tracing::instrument;

use crate::{LodeError, Precondition, Result};

/// Ref holding the metadata history.
pub const METADATA_REF: &str = "refs/heads/git-annex";

/// Branch name of the metadata history on remotes.
pub const METADATA_BRANCH: &str = "git-annex";

/// Staging directory, relative to the git dir.
pub const STAGING_DIR: &str = "annex/lode-staging";

/// What merging another replica's metadata history did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchMerge {
    /// The remote has no metadata history.
    Absent,
    UpToDate,
    FastForward(CommitId),
    Merged(CommitId),
}

#[derive(Debug, Clone)]
pub struct MetadataBranch {
    ref_name: String,
    staging: PathBuf,
    scratch_root: PathBuf,
}

impl MetadataBranch {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            ref_name: METADATA_REF.to_string(),
            staging: git_dir.join(STAGING_DIR),
            scratch_root: git_dir.join("annex"),
        }
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    pub fn head<V: Vcs>(&self, vcs: &V) -> Result<Option<CommitId>> {
        Ok(vcs.resolve(&self.ref_name)?)
    }

    fn require_head<V: Vcs>(&self, vcs: &V) -> Result<CommitId> {
        self.head(vcs)?
            .ok_or_else(|| Precondition::NotInitialized.into())
    }

    /// Create the root snapshot holding the registry record and marker for
    /// `replica`. Fails if the history already exists.
    pub fn initialize<V: Vcs>(
        &self,
        vcs: &mut V,
        replica: &ReplicaId,
        description: &str,
        created: Timestamp,
    ) -> Result<CommitId> {
        if self.head(vcs)?.is_some() {
            return Err(Precondition::AlreadyInitialized.into());
        }
        let journal = self.reset_staging()?;
        let registry = journal.append_registry(&ReplicaRecord::new(
            replica.clone(),
            description,
            created,
        ))?;
        let marker = journal.write_marker(&CapabilityMarker::new(replica.clone(), created))?;
        let commit = self.commit(vcs, &[registry, marker], "branch created", &[])?;
        log_branch_info!(replica = %replica, commit = %commit, "metadata history created");
        Ok(commit)
    }

    /// Apply `edit` to a checkout of `paths` and commit the result.
    ///
    /// `edit` returns the tree paths it changed, which must be among
    /// `paths`; when it changed nothing no commit is made and `None` is
    /// returned.
    #[instrument(skip(self, vcs, edit), level = "debug")]
    pub fn update<V, F>(
        &self,
        vcs: &mut V,
        message: &str,
        paths: &[String],
        edit: F,
    ) -> Result<Option<CommitId>>
    where
        V: Vcs,
        F: FnOnce(&Journal) -> Result<Vec<String>>,
    {
        let head = self.require_head(vcs)?;
        let journal = self.reset_staging()?;
        if !paths.is_empty() {
            vcs.checkout(&head.0, paths, journal.root())?;
        }

        let changed = match edit(&journal) {
            Ok(changed) => changed,
            Err(e) => {
                self.clear_staging()?;
                return Err(e);
            }
        };
        if let Some(stray) = changed.iter().find(|c| !paths.contains(c)) {
            self.clear_staging()?;
            return Err(LodeError::Input(format!(
                "{} was changed but not checked out",
                stray
            )));
        }
        if changed.is_empty() {
            self.clear_staging()?;
            log_branch_debug!("nothing to commit");
            return Ok(None);
        }
        self.commit(vcs, &changed, message, &[head]).map(Some)
    }

    /// Commit the `changed` staging files over `parents` and advance the ref
    /// from `parents[0]` (or from nothing, for the root commit). Files not in
    /// `changed` keep what `parents[0]` holds.
    pub fn commit<V: Vcs>(
        &self,
        vcs: &mut V,
        changed: &[String],
        message: &str,
        parents: &[CommitId],
    ) -> Result<CommitId> {
        for path in changed {
            if !self.staging.join(path).is_file() {
                return Err(LodeError::Input(format!(
                    "{} is not in the metadata staging area",
                    path
                )));
            }
        }
        let tree = vcs.build_tree(parents.first(), &self.staging, changed)?;
        let commit = vcs.create_commit(&tree, parents, message)?;
        vcs.update_ref(&self.ref_name, &commit, Some(parents.first()))?;
        self.clear_staging()?;
        log_branch_debug!(commit = %commit, files = changed.len(), "metadata committed");
        Ok(commit)
    }

    /// Union-merge another replica's history (`remote_ref`) into ours.
    ///
    /// Every file of this one merge is combined by keeping the lines of both
    /// sides; no other merge sees that policy.
    #[instrument(skip(self, vcs), level = "debug")]
    pub fn merge<V: Vcs>(&self, vcs: &mut V, remote_ref: &str) -> Result<BranchMerge> {
        let ours = self.require_head(vcs)?;
        let Some(theirs) = vcs.resolve(remote_ref)? else {
            return Ok(BranchMerge::Absent);
        };
        self.check_capabilities(vcs, &theirs)?;

        let outcome = match vcs.merge_commits(&ours, &theirs, FileMergeStrategy::Union)? {
            TreeMerge::UpToDate => BranchMerge::UpToDate,
            TreeMerge::FastForward => {
                vcs.update_ref(&self.ref_name, &theirs, Some(Some(&ours)))?;
                BranchMerge::FastForward(theirs)
            }
            TreeMerge::Clean(tree) => {
                let message = format!("merging {} into {}", remote_ref, METADATA_BRANCH);
                let commit = vcs.create_commit(&tree, &[ours.clone(), theirs], &message)?;
                vcs.update_ref(&self.ref_name, &commit, Some(Some(&ours)))?;
                BranchMerge::Merged(commit)
            }
            TreeMerge::Conflicted(paths) => {
                return Err(LodeError::Corruption(format!(
                    "metadata merge with {} conflicted in: {}",
                    remote_ref,
                    paths.join(", ")
                )));
            }
        };
        log_branch_info!(remote = remote_ref, outcome = ?outcome, "metadata merged");
        Ok(outcome)
    }

    /// Refuse histories whose marker declares layout choices we do not know.
    fn check_capabilities<V: Vcs>(&self, vcs: &mut V, commit: &CommitId) -> Result<()> {
        let scratch = self.scratch()?;
        vcs.checkout(&commit.0, &[MARKER_FILE.to_string()], scratch.path())?;
        let text = match fs::read_to_string(scratch.path().join(MARKER_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let unknown: Vec<String> = parse_markers(&text)?
            .iter()
            .flat_map(|m| m.unknown())
            .map(|c| c.to_string())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(LodeError::Corruption(format!(
                "metadata history requires unsupported capabilities: {}",
                unknown.join(", ")
            )))
        }
    }

    /// Read-only checkout of `paths` of the current history, or of every
    /// file when `paths` is empty. The files disappear when the returned
    /// directory is dropped.
    pub fn view<V: Vcs>(&self, vcs: &mut V, paths: &[String]) -> Result<(TempDir, Journal)> {
        let head = self.require_head(vcs)?;
        let scratch = self.scratch()?;
        vcs.checkout(&head.0, paths, scratch.path())?;
        let journal = Journal::new(scratch.path());
        Ok((scratch, journal))
    }

    /// One file of the current history, if present.
    pub fn read_file<V: Vcs>(&self, vcs: &mut V, rel: &str) -> Result<Option<String>> {
        let (_scratch, journal) = self.view(vcs, &[rel.to_string()])?;
        Ok(journal.read_text(rel)?)
    }

    fn scratch(&self) -> Result<TempDir> {
        fs::create_dir_all(&self.scratch_root)?;
        Ok(TempDir::new_in(&self.scratch_root)?)
    }

    fn reset_staging(&self) -> Result<Journal> {
        self.clear_staging()?;
        fs::create_dir_all(&self.staging)?;
        Ok(Journal::new(&self.staging))
    }

    fn clear_staging(&self) -> Result<()> {
        match fs::remove_dir_all(&self.staging) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
