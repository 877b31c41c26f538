//! Layered configuration discovery and merging.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `~/.tenderstore/config.toml`
//! 3. `<dir>/.tenderstore/config.toml`
//! 4. CLI overrides
//!
//! An explicit file (`--config`) replaces layers 2 and 3. Files are merged as
//! TOML tables key by key before deserializing, so a layer only changes the
//! keys it names, and it may set a key back to its default value.

use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::Table;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::{ConfigOverrides, EngineConfig};

const DIR_NAME: &str = ".tenderstore";
const FILE_NAME: &str = "config.toml";

/// Where a configuration layer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Global,
    Local,
    Explicit,
}

/// A merged configuration and the files that contributed to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    /// Files read, lowest precedence first
    pub sources: Vec<(ConfigSource, PathBuf)>,
}

/// Finds and merges configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    home: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader that reads the global file from the user's home directory.
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
        }
    }

    /// A loader with a fixed home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    pub fn global_path(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|h| h.join(DIR_NAME).join(FILE_NAME))
    }

    pub fn local_path(&self, dir: &Path) -> PathBuf {
        dir.join(DIR_NAME).join(FILE_NAME)
    }

    /// Existing global and local files for `dir`, lowest precedence first.
    pub fn discover(&self, dir: &Path) -> Vec<(ConfigSource, PathBuf)> {
        let candidates = [
            self.global_path().map(|p| (ConfigSource::Global, p)),
            Some((ConfigSource::Local, self.local_path(dir))),
        ];
        candidates
            .into_iter()
            .flatten()
            .filter(|(source, path)| {
                let found = path.is_file();
                if !found {
                    trace!(?source, path = %path.display(), "no config file");
                }
                found
            })
            .collect()
    }

    /// Merge defaults, the global file, the local file for `dir`, then `overrides`.
    pub fn load(
        &self,
        dir: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<LoadedConfig, ConfigError> {
        resolve(self.discover(dir), overrides)
    }

    /// Merge defaults, the file at `path`, then `overrides`.
    pub fn load_explicit(
        &self,
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<LoadedConfig, ConfigError> {
        resolve(vec![(ConfigSource::Explicit, path.to_path_buf())], overrides)
    }

    /// Write defaults to the global file unless it exists. Returns its path.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let path = self.global_path().ok_or(ConfigError::NoHomeDir)?;
        write_default(&path)?;
        Ok(path)
    }

    /// Write defaults to the local file for `dir` unless it exists. Returns its path.
    pub fn init_local(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = self.local_path(dir);
        write_default(&path)?;
        Ok(path)
    }
}

fn resolve(
    layers: Vec<(ConfigSource, PathBuf)>,
    overrides: Option<&ConfigOverrides>,
) -> Result<LoadedConfig, ConfigError> {
    let mut merged = Table::new();
    for (source, path) in &layers {
        debug!(?source, path = %path.display(), "reading config");
        let layer = read_table(path)?;
        // Type errors are reported against the file that holds them
        toml::Value::Table(layer.clone())
            .try_into::<EngineConfig>()
            .map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        merge_tables(&mut merged, layer);
    }

    let mut config: EngineConfig = toml::Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::invalid("config", e.to_string()))?;
    if let Some(overrides) = overrides {
        config.apply_overrides(overrides);
    }

    Ok(LoadedConfig {
        config,
        sources: layers,
    })
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Overlay `top` onto `base`. Nested tables merge; any other value in `top`
/// replaces the one in `base`.
fn merge_tables(base: &mut Table, top: Table) {
    for (key, value) in top {
        if let toml::Value::Table(overlay) = value {
            if let Some(toml::Value::Table(inner)) = base.get_mut(&key) {
                merge_tables(inner, overlay);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay));
        } else {
            base.insert(key, value);
        }
    }
}

fn write_default(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        debug!(path = %path.display(), "config file already present");
        return Ok(());
    }
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let text = toml::to_string_pretty(&EngineConfig::default())?;
    std::fs::write(path, text).map_err(write_err)
}
