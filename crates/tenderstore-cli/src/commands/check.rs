//! Check and repair commands - consistency audit of the database
//!
//! `check` exits with status 1 when it finds anything.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use tenderstore_config::EngineConfig;
use tracing::info;

use super::{open_store, print_info};
use crate::GlobalOptions;

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Output as JSON for scripts
    #[arg(long)]
    json: bool,
}

/// Arguments for the repair command
#[derive(Args, Debug)]
pub struct RepairArgs {}

/// Execute the check command
pub fn check(args: CheckArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    let report = store.run_checks().context("Consistency check failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        print_info("No issues found", global.quiet);
    } else {
        print!("{}", report);
        print_info("\nRun `tenderstore repair` to fix these issues.", global.quiet);
    }

    if !report.is_clean() {
        drop(store);
        std::io::stdout().flush()?;
        std::process::exit(1);
    }
    Ok(())
}

/// Execute the repair command
pub fn repair(_args: RepairArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    let report = store.run_checks().context("Consistency check failed")?;
    if !report.is_clean() {
        info!(
            orphans = report.orphan_count(),
            missing_indexes = report.missing_indexes.len(),
            "Repairing database"
        );
    }

    let outcome = store.auto_repair(&report);
    if !outcome.ok {
        anyhow::bail!("{}", outcome.message);
    }

    print_info(&outcome.message, global.quiet);
    Ok(())
}
