//! TenderStore CLI - operator surface over the tender database
//!
//! # Usage
//!
//! ```bash
//! # Create or upgrade the database
//! tenderstore migrate
//!
//! # Save a tender from a JSON file and look at it again
//! tenderstore import tender.json
//! tenderstore show 1
//!
//! # Full-text search over tenders and requested documents
//! tenderstore search "insurance policy"
//!
//! # Find and fix orphan rows and missing indexes
//! tenderstore check
//! tenderstore repair
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tenderstore_config::{ConfigOverrides, LogFormat, LoggingConfig};
use tenderstore_core::StoreError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// TenderStore - procurement tender database maintenance
#[derive(Parser, Debug)]
#[command(name = "tenderstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Options accepted before or after any subcommand
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Database file to operate on
    #[arg(long, short = 'd', global = true, env = "TENDERSTORE_DB")]
    database: Option<PathBuf>,

    /// Read only this configuration file, skipping the global and local ones
    #[arg(long, short = 'c', global = true, env = "TENDERSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Only print results and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

impl GlobalOptions {
    /// The subset of these options that overrides configuration files
    pub fn to_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_path: self.database.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database or bring an existing one up to date
    Migrate(commands::migrate::MigrateArgs),

    /// List stored tenders
    List(commands::tenders::ListArgs),

    /// Print one tender with all of its children as JSON
    Show(commands::tenders::ShowArgs),

    /// Save a tender read from a JSON file
    Import(commands::tenders::ImportArgs),

    /// Delete a tender and everything attached to it
    Delete(commands::tenders::DeleteArgs),

    /// Full-text search over tenders and requested documents
    Search(commands::search::SearchArgs),

    /// Rebuild the full-text search index from the base tables
    Reindex(commands::search::ReindexArgs),

    /// Report orphan rows, missing indexes and search index damage
    Check(commands::check::CheckArgs),

    /// Run the checks and repair what they find
    Repair(commands::check::RepairArgs),

    /// Read and write application settings stored in the database
    #[command(subcommand)]
    Setting(commands::setting::SettingCommand),

    /// Inspect or create configuration files
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            commands::print_error(&format!("{err:#}"));
            if let Some(StoreError::Concurrency { tender_id, .. }) = err.downcast_ref::<StoreError>()
            {
                eprintln!(
                    "hint: reload tender {tender_id} (tenderstore show {tender_id}), \
                     apply your changes to the fresh copy and save again"
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Config commands must work even when the config file is broken
    let loaded = match cli.command {
        Commands::Config(_) => None,
        _ => Some(commands::load_config(&cli.global)?),
    };
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(LoggingConfig::default);
    init_logging(&cli.global, &logging)?;
    let config = loaded.unwrap_or_default();

    match cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args, &config, cli.global),
        Commands::List(args) => commands::tenders::list(args, &config, cli.global),
        Commands::Show(args) => commands::tenders::show(args, &config, cli.global),
        Commands::Import(args) => commands::tenders::import(args, &config, cli.global),
        Commands::Delete(args) => commands::tenders::delete(args, &config, cli.global),
        Commands::Search(args) => commands::search::execute(args, &config, cli.global),
        Commands::Reindex(args) => commands::search::reindex(args, &config, cli.global),
        Commands::Check(args) => commands::check::check(args, &config, cli.global),
        Commands::Repair(args) => commands::check::repair(args, &config, cli.global),
        Commands::Setting(cmd) => commands::setting::execute(cmd, &config, cli.global),
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global),
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over every other source.
fn init_logging(global: &GlobalOptions, logging: &LoggingConfig) -> Result<()> {
    let level = if global.quiet {
        "error".to_string()
    } else if global.verbose {
        "debug".to_string()
    } else {
        logging.level.to_ascii_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => {
            tracing::subscriber::set_global_default(builder.with_ansi(true).finish())?
        }
    }
    Ok(())
}
