//! File-based settings for the tender store: where the database lives, how
//! search snippets look, and how the CLI logs. See [`ConfigLoader`] for the
//! layering rules.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, ConfigSource, LoadedConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every section of `config.toml`. Missing sections take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

/// Where the database lives and how connections are tuned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file (default: `tenders.db`, relative to the working directory)
    pub database_path: PathBuf,

    /// How long a writer waits for a competing lock, in milliseconds
    pub busy_timeout_ms: u64,

    /// Write-ahead logging for the database file
    pub wal: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tenders.db"),
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

/// Full-text search presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,

    /// Tokens of context around each match in snippets
    pub snippet_tokens: u32,

    pub highlight_open: String,
    pub highlight_close: String,
    pub ellipsis: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 50,
            snippet_tokens: 12,
            highlight_open: "[".to_string(),
            highlight_close: "]".to_string(),
            ellipsis: "…".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Values given on the command line; each `Some` beats every file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub max_results: Option<usize>,
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl EngineConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.database_path {
            self.storage.database_path.clone_from(path);
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level.clone_from(level);
        }
        if let Some(n) = overrides.max_results {
            self.search.max_results = n;
        }
    }

    /// Reject values the store cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "storage.database_path",
                "must not be empty",
            ));
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::invalid(
                "search.max_results",
                "must be at least 1",
            ));
        }
        if self.search.snippet_tokens == 0 {
            return Err(ConfigError::invalid(
                "search.snippet_tokens",
                "must be at least 1",
            ));
        }
        if self.search.highlight_open.is_empty() || self.search.highlight_close.is_empty() {
            return Err(ConfigError::invalid(
                "search.highlight_open/highlight_close",
                "highlight markers must not be empty",
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!(
                    "unknown level '{}' (expected one of {})",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }
        Ok(())
    }

    /// The database file, relative paths resolved against `base_dir`.
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        if self.storage.database_path.is_absolute() {
            self.storage.database_path.clone()
        } else {
            base_dir.join(&self.storage.database_path)
        }
    }
}
