//! CLI command implementations

pub mod check;
pub mod config;
pub mod migrate;
pub mod search;
pub mod setting;
pub mod tenders;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tenderstore_config::{ConfigLoader, EngineConfig, LoadedConfig};
use tenderstore_core::{SearchOptions, StoreOptions, TenderStore};
use tracing::debug;

use crate::GlobalOptions;

/// Directory the local config and relative database paths resolve against.
pub fn working_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to get current directory")
}

/// Resolve the layered configuration: an explicit `--config` file, else the
/// global and local files. CLI overrides are applied last.
pub fn load_layers(global: &GlobalOptions) -> Result<LoadedConfig> {
    let overrides = global.to_config_overrides();
    let loader = ConfigLoader::new();

    match global.config {
        Some(ref path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            loader
                .load_explicit(path, Some(&overrides))
                .context("Failed to load config file")
        }
        None => loader
            .load(&working_dir()?, Some(&overrides))
            .context("Failed to load configuration"),
    }
}

/// [`load_layers`], validated.
pub fn load_config(global: &GlobalOptions) -> Result<EngineConfig> {
    let loaded = load_layers(global)?;
    loaded.config.validate().context("Invalid configuration")?;
    Ok(loaded.config)
}

/// Map the file configuration onto the engine's options.
pub fn store_options(config: &EngineConfig) -> StoreOptions {
    StoreOptions {
        busy_timeout: Duration::from_millis(config.storage.busy_timeout_ms),
        wal: config.storage.wal,
        search: SearchOptions {
            max_results: config.search.max_results,
            snippet_tokens: config.search.snippet_tokens,
            highlight_open: config.search.highlight_open.clone(),
            highlight_close: config.search.highlight_close.clone(),
            ellipsis: config.search.ellipsis.clone(),
        },
    }
}

/// Open (and migrate) the configured database.
pub fn open_store(config: &EngineConfig) -> Result<TenderStore> {
    let path = config.database_path(&working_dir()?);
    debug!("Opening tender database at {:?}", path);

    TenderStore::open(&path, store_options(config))
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Print an error message to stderr.
pub fn print_error(message: &str) {
    eprintln!("error: {}", message);
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
