//! Setting command - key/value application settings kept in the database

use anyhow::{Context, Result};
use clap::Subcommand;
use tenderstore_config::EngineConfig;

use super::{open_store, print_info};
use crate::GlobalOptions;

/// Settings management commands
#[derive(Subcommand, Debug)]
pub enum SettingCommand {
    /// Print one setting
    Get {
        /// Setting key
        key: String,
    },

    /// Create or replace a setting
    Set {
        /// Setting key
        key: String,

        /// Value to store
        value: String,
    },

    /// List every setting
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove a setting
    Delete {
        /// Setting key
        key: String,
    },
}

/// Execute the setting command
pub fn execute(cmd: SettingCommand, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;

    match cmd {
        SettingCommand::Get { key } => {
            let value = store
                .get_setting(&key)
                .with_context(|| format!("Failed to read setting '{}'", key))?
                .ok_or_else(|| anyhow::anyhow!("Setting '{}' is not set", key))?;
            println!("{}", value);
        }
        SettingCommand::Set { key, value } => {
            store
                .set_setting(&key, &value)
                .with_context(|| format!("Failed to store setting '{}'", key))?;
            print_info(&format!("Set {} = {}", key, value), global.quiet);
        }
        SettingCommand::List { json } => {
            let settings = store.settings().context("Failed to read settings")?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else if settings.is_empty() {
                print_info("No settings stored", global.quiet);
            } else {
                for (key, value) in settings {
                    println!("{} = {}", key, value);
                }
            }
        }
        SettingCommand::Delete { key } => {
            if !store
                .delete_setting(&key)
                .with_context(|| format!("Failed to delete setting '{}'", key))?
            {
                anyhow::bail!("Setting '{}' is not set", key);
            }
            print_info(&format!("Deleted {}", key), global.quiet);
        }
    }

    Ok(())
}
