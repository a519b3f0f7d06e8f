use std::io;

use thiserror::Error;

/// Errors raised while reading or writing metadata files
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt {file} line {line}: {reason}")]
    Corrupt {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Malformed replica id: {0:?}")]
    MalformedReplica(String),

    #[error("Malformed timestamp: {0:?}")]
    MalformedTimestamp(String),
}

pub type Result<T> = std::result::Result<T, JournalError>;
