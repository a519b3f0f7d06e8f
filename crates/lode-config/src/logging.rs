//! Structured logging utilities for lode components.
//!
//! Every event carries a `component` field so output can be filtered per
//! subsystem.
//!
//! # Usage
//!
//! ```ignore
//! use lode_config::{log_branch_info, log_merge_warn};
//!
//! log_branch_info!(commit = %id, "metadata committed");
//! log_merge_warn!(path = %path, "unsupported conflict");
//! ```

use std::fmt;
use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const KEY: &'static str = "KEY";
    pub const JOURNAL: &'static str = "JOURNAL";
    pub const BRANCH: &'static str = "BRANCH";
    pub const MERGE: &'static str = "MERGE";
    pub const CONFIG: &'static str = "CONFIG";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

// === KEY logging macros ===

#[macro_export]
macro_rules! log_key_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::KEY, $($arg)+)
    };
}

// === JOURNAL logging macros ===

#[macro_export]
macro_rules! log_journal_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::JOURNAL, $($arg)+)
    };
}

// === BRANCH logging macros ===

#[macro_export]
macro_rules! log_branch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::BRANCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_branch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::BRANCH, $($arg)+)
    };
}

// === MERGE logging macros ===

#[macro_export]
macro_rules! log_merge_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::MERGE, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_merge_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::MERGE, $($arg)+)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($arg)+)
    };
}

/// Initialize logging to stderr at the given level.
///
/// `LODE_LOG`, then `RUST_LOG`, replace the level with a full filter
/// directive when set. Calling this more than once is harmless.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("LODE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
