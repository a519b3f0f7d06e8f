use std::io;

use lode_cas::CasError;
use lode_journal::JournalError;
use lode_vcs::VcsError;
use thiserror::Error;

/// Conditions the repository must satisfy before an operation may start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    #[error("repository is not initialized for lode")]
    NotInitialized,

    #[error("repository is already initialized for lode")]
    AlreadyInitialized,

    #[error("uncommitted changes in the work tree")]
    UncommittedChanges,

    #[error("not enough copies of {key}: found {have} elsewhere, need {need}")]
    NotEnoughCopies { key: String, have: usize, need: u32 },

    #[error("{name} moved while it was being updated")]
    StaleReference { name: String },
}

/// Errors surfaced by repository operations
#[derive(Error, Debug)]
pub enum LodeError {
    /// Unreadable or malformed input: user files, keys, paths.
    #[error("{0}")]
    Input(String),

    /// Metadata that cannot be read back as written.
    #[error("corrupt metadata: {0}")]
    Corruption(String),

    #[error(transparent)]
    Precondition(#[from] Precondition),

    /// Merge conflicts this engine will not repair. The repository is left
    /// in its conflicted state.
    #[error("unsupported conflict: {}", .0.join("; "))]
    UnsupportedConflict(Vec<String>),

    /// The version-control backend failed.
    #[error("{0}")]
    External(VcsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LodeError>;

impl From<CasError> for LodeError {
    fn from(e: CasError) -> Self {
        match e {
            CasError::KeyMismatch { .. } => LodeError::Corruption(e.to_string()),
            other => LodeError::Input(other.to_string()),
        }
    }
}

impl From<JournalError> for LodeError {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Io(io) => LodeError::Io(io),
            JournalError::Corrupt { .. } => LodeError::Corruption(e.to_string()),
            other => LodeError::Input(other.to_string()),
        }
    }
}

impl From<VcsError> for LodeError {
    fn from(e: VcsError) -> Self {
        match e {
            VcsError::RefMoved { name, .. } => Precondition::StaleReference { name }.into(),
            other => LodeError::External(other),
        }
    }
}
