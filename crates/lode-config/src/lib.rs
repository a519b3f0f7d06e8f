//! # lode-config
//!
//! Configuration management for lode.
//!
//! Loads configuration from:
//! 1. `~/.lode/config.toml` (global)
//! 2. `<git-dir>/lode/config.toml` (repository, overrides global)
//! 3. Environment variables (highest priority)
//!
//! There is no process-wide instance: the loaded [`Config`] is handed to the
//! repository context that needs it.

pub mod logging;
pub mod path;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

/// Environment variable naming the git executable.
pub const ENV_GIT: &str = "LODE_GIT";
pub const ENV_NUMCOPIES: &str = "LODE_NUMCOPIES";
pub const ENV_LOG_LEVEL: &str = "LODE_LOG_LEVEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub hashing: HashingConfig,
    pub vcs: VcsConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the standard locations, using the repository file
    /// under `git_dir` when given.
    pub fn load(git_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let repo = git_dir.map(Self::repo_config_path);
        let mut config = Self::load_from(global.as_deref(), repo.as_deref())?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load and layer the given files without consulting the environment.
    pub fn load_from(global: Option<&Path>, repo: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = global.filter(|p| p.exists()) {
            debug!(component = logging::Component::CONFIG, path = %path.display(), "loading global config");
            config = Self::read_file(path)?;
        }

        if let Some(path) = repo.filter(|p| p.exists()) {
            debug!(component = logging::Component::CONFIG, path = %path.display(), "loading repository config");
            let repo_config = Self::read_file(path)?;
            config.merge(repo_config);
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Global config path: ~/.lode/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".lode/config.toml"))
    }

    pub fn repo_config_path(git_dir: &Path) -> PathBuf {
        git_dir.join("lode/config.toml")
    }

    /// Take every value of `other` that differs from the default.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.repository.description != defaults.repository.description {
            self.repository.description = other.repository.description;
        }
        if other.repository.numcopies != defaults.repository.numcopies {
            self.repository.numcopies = other.repository.numcopies;
        }
        if other.hashing.chunk_size != defaults.hashing.chunk_size {
            self.hashing.chunk_size = other.hashing.chunk_size;
        }
        if other.vcs.git_program != defaults.vcs.git_program {
            self.vcs.git_program = other.vcs.git_program;
        }
        if !other.sync.remotes.is_empty() {
            self.sync.remotes = other.sync.remotes;
        }
        if other.logging.level != defaults.logging.level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply overrides read through `lookup` (the environment in
    /// [`Config::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(git) = lookup(ENV_GIT) {
            self.vcs.git_program = git;
        }
        if let Some(n) = lookup(ENV_NUMCOPIES) {
            self.repository.numcopies = n.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_NUMCOPIES.to_string(),
                value: n.clone(),
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Configured log level; unknown names fall back to `warn`.
    pub fn log_level(&self) -> LogLevel {
        self.logging.level.parse().unwrap_or(LogLevel::Warn)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Replica defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Description recorded for a replica when `init` is given none
    pub description: String,
    /// Other replicas that must hold content before it may be dropped
    pub numcopies: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            numcopies: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Read size when streaming content through the hasher
    pub chunk_size: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub git_program: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remotes to synchronize with; all known remotes when empty
    pub remotes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
