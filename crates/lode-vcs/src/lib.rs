//! # lode-vcs
//!
//! The version-control operations lode builds on, as one trait.
//!
//! lode never talks to an object database directly. Everything it needs
//! (materializing a revision into a directory, turning a directory back into
//! a tree, committing, moving refs, merging, reading the sides of a
//! conflict) goes through [`Vcs`]. Two backends ship:
//!
//! - [`MemoryVcs`]: an in-process object database over a real work tree,
//!   with remotes linked to other in-memory stores.
//! - [`GitVcs`]: drives the `git` executable.

pub mod git;
pub mod memory;

pub use git::GitVcs;
pub use memory::{MemoryStore, MemoryVcs};

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors reported by a version-control backend
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("`{op}` failed ({status}): {stderr}")]
    CommandFailed {
        op: String,
        status: String,
        stderr: String,
    },

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Ref {name} moved: expected {expected}, found {found}")]
    RefMoved {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Unresolved conflicts in: {}", .0.join(", "))]
    Unmerged(Vec<String>),

    #[error("Unexpected output from `{op}`: {detail}")]
    Malformed { op: String, detail: String },
}

pub type Result<T> = std::result::Result<T, VcsError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content of one tracked path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    Blob(Vec<u8>),
    Link(String),
}

impl TreeEntry {
    pub fn link_target(&self) -> Option<&str> {
        match self {
            TreeEntry::Link(t) => Some(t),
            TreeEntry::Blob(_) => None,
        }
    }
}

/// One side of a three-way merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Base,
    Ours,
    Theirs,
}

impl Side {
    /// Index stage number holding this side of a conflict.
    pub fn stage(self) -> u8 {
        match self {
            Side::Base => 1,
            Side::Ours => 2,
            Side::Theirs => 3,
        }
    }
}

/// Shape of an unmerged path, from which sides are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    BothAdded,
    BothModified,
    AddedByUs,
    AddedByThem,
    DeletedByUs,
    DeletedByThem,
    BothDeleted,
}

impl ConflictKind {
    pub fn from_sides(base: bool, ours: bool, theirs: bool) -> Option<Self> {
        match (base, ours, theirs) {
            (false, true, true) => Some(ConflictKind::BothAdded),
            (true, true, true) => Some(ConflictKind::BothModified),
            (false, true, false) => Some(ConflictKind::AddedByUs),
            (false, false, true) => Some(ConflictKind::AddedByThem),
            (true, false, true) => Some(ConflictKind::DeletedByUs),
            (true, true, false) => Some(ConflictKind::DeletedByThem),
            (true, false, false) => Some(ConflictKind::BothDeleted),
            (false, false, false) => None,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::BothAdded => "both added",
            ConflictKind::BothModified => "both modified",
            ConflictKind::AddedByUs => "added by us",
            ConflictKind::AddedByThem => "added by them",
            ConflictKind::DeletedByUs => "deleted by us",
            ConflictKind::DeletedByThem => "deleted by them",
            ConflictKind::BothDeleted => "both deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
}

/// How file contents changed on both sides are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMergeStrategy {
    /// The backend's ordinary conflict detection.
    #[default]
    Standard,
    /// Keep the lines of both sides. Never conflicts on regular files.
    Union,
}

/// Result of merging two commits at tree level, without touching any work
/// tree or ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeMerge {
    /// `theirs` is already contained in `ours`.
    UpToDate,
    /// `ours` is an ancestor of `theirs`.
    FastForward,
    Clean(TreeId),
    Conflicted(Vec<String>),
}

/// Result of merging a revision into the checked-out branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    FastForward(CommitId),
    Merged(CommitId),
    /// Index and work tree hold the conflicted state; nothing was committed.
    Conflicted(Vec<String>),
}

/// Version-control capability consumed by the lode engine.
///
/// Callers must ensure at most one lode operation runs against a repository
/// at a time; backends do not lock beyond what the underlying system does.
pub trait Vcs {
    /// Root of the checked-out work tree.
    fn work_tree(&self) -> &Path;

    /// Version-control metadata directory (`.git`).
    fn git_dir(&self) -> &Path;

    /// Commit a revision or ref name points at, if it exists.
    fn resolve(&self, rev: &str) -> Result<Option<CommitId>>;

    /// Point `name` at `new`. When `expected` is given the update only
    /// happens if the ref still points there (`None` inside means the ref
    /// must not exist yet).
    fn update_ref(
        &mut self,
        name: &str,
        new: &CommitId,
        expected: Option<Option<&CommitId>>,
    ) -> Result<()>;

    /// Write the files of `rev` into `work_area`; all files when `paths` is
    /// empty. Does not touch the main index or HEAD.
    fn checkout(&mut self, rev: &str, paths: &[String], work_area: &Path) -> Result<()>;

    /// The tree of `base` (empty when `None`) with each of `paths` set to
    /// what `work_area` holds there, or dropped where it holds nothing.
    /// Files outside `paths` are never read.
    fn build_tree(
        &mut self,
        base: Option<&CommitId>,
        work_area: &Path,
        paths: &[String],
    ) -> Result<TreeId>;

    fn create_commit(
        &mut self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId>;

    /// Merge two commits into a tree, applying `strategy` to every file of
    /// this one merge only.
    fn merge_commits(
        &mut self,
        ours: &CommitId,
        theirs: &CommitId,
        strategy: FileMergeStrategy,
    ) -> Result<TreeMerge>;

    /// Merge `rev` into the checked-out branch, updating index and work
    /// tree. Unrelated histories are allowed.
    fn merge_into_head(&mut self, rev: &str) -> Result<MergeOutcome>;

    /// Unmerged paths of the main index.
    fn conflicts(&self) -> Result<Vec<Conflict>>;

    /// One side of an unmerged path, read from the index, not the work tree.
    fn inspect_side(&self, path: &str, side: Side) -> Result<Option<TreeEntry>>;

    /// Record the work-tree state of `path` in the main index.
    fn stage(&mut self, path: &str) -> Result<()>;

    /// Drop `path` from the index and the work tree.
    fn remove(&mut self, path: &str) -> Result<()>;

    /// Commit the main index onto HEAD, concluding a pending merge if any.
    fn commit_index(&mut self, message: &str) -> Result<CommitId>;

    /// Whether tracked files differ from HEAD (staged or not).
    fn is_dirty(&self) -> Result<bool>;

    fn current_branch(&self) -> Result<Option<String>>;

    fn config_get(&self, key: &str) -> Result<Option<String>>;

    fn config_set(&mut self, key: &str, value: &str) -> Result<()>;

    fn remote_names(&self) -> Result<BTreeSet<String>>;

    /// Bring a remote's branches into `refs/remotes/<remote>/`.
    fn fetch(&mut self, remote: &str) -> Result<()>;
}

/// Ref a fetched remote branch is stored under.
pub fn remote_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

/// Create a symlink at `path` pointing at `target`.
#[cfg(unix)]
pub fn make_link(target: &str, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

/// Without symlinks the target is written as the file's content, which is
/// how git checks out links when `core.symlinks` is off.
#[cfg(not(unix))]
pub fn make_link(target: &str, path: &Path) -> io::Result<()> {
    std::fs::write(path, target)
}
