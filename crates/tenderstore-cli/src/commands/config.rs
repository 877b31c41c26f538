//! `tenderstore config`: inspect and create configuration files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tenderstore_config::{ConfigLoader, ConfigSource, EngineConfig};

use super::{load_config, load_layers, print_info, working_dir};
use crate::GlobalOptions;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration
    Show(ShowArgs),

    /// List configuration file locations and which of them were read
    Path(PathArgs),

    /// Write a configuration file holding the defaults
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Print JSON instead of TOML
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Write ~/.tenderstore/config.toml instead of ./.tenderstore/config.toml
    #[arg(long)]
    global: bool,
}

#[derive(Debug, Serialize)]
struct Locations {
    global: Option<PathBuf>,
    local: PathBuf,
    explicit: Option<PathBuf>,
    /// Files merged into the effective configuration, lowest precedence first
    read: Vec<(ConfigSource, PathBuf)>,
    /// Why the files could not be merged, if they could not
    error: Option<String>,
    database: PathBuf,
}

pub fn execute(cmd: ConfigCommand, global: GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) => show(args, &global),
        ConfigCommand::Path(args) => path(args, &global),
        ConfigCommand::Init(args) => init(args, &global),
    }
}

fn show(args: ShowArgs, global: &GlobalOptions) -> Result<()> {
    let config = load_config(global)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to encode configuration")?
        );
    }
    Ok(())
}

/// Works even when the configuration is broken, so the bad file can be found.
fn path(args: PathArgs, global: &GlobalOptions) -> Result<()> {
    let dir = working_dir()?;
    let loader = ConfigLoader::new();

    let (read, config, error) = match load_layers(global) {
        Ok(loaded) => (loaded.sources, loaded.config, None),
        Err(err) => (Vec::new(), EngineConfig::default(), Some(format!("{err:#}"))),
    };
    let locations = Locations {
        global: loader.global_path(),
        local: loader.local_path(&dir),
        explicit: global.config.clone(),
        read,
        error,
        database: config.database_path(&dir),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&locations)?);
        return Ok(());
    }

    match &locations.global {
        Some(p) => println!("global    {}", p.display()),
        None => println!("global    (no home directory)"),
    }
    println!("local     {}", locations.local.display());
    if let Some(p) = &locations.explicit {
        println!("explicit  {}", p.display());
    }
    if locations.read.is_empty() {
        println!("read      (none, using defaults)");
    }
    for (source, p) in &locations.read {
        println!("read      {} [{}]", p.display(), source_label(*source));
    }
    if let Some(err) = &locations.error {
        println!("error     {err}");
    }
    println!("database  {}", locations.database.display());
    Ok(())
}

fn source_label(source: ConfigSource) -> &'static str {
    match source {
        ConfigSource::Global => "global",
        ConfigSource::Local => "local",
        ConfigSource::Explicit => "explicit",
    }
}

fn init(args: InitArgs, global: &GlobalOptions) -> Result<()> {
    let loader = ConfigLoader::new();
    let path = if args.global {
        loader.init_global().context("Failed to create global configuration")?
    } else {
        loader
            .init_local(&working_dir()?)
            .context("Failed to create local configuration")?
    };

    print_info("Configuration file ready:", global.quiet);
    println!("{}", path.display());
    Ok(())
}
