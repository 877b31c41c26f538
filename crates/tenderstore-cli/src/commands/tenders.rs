//! Tender commands - list, show, import and delete whole aggregates

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tenderstore_config::EngineConfig;
use tenderstore_core::TenderRecord;
use tracing::info;

use super::{open_store, print_info};
use crate::GlobalOptions;

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Tender id
    id: i64,
}

/// Arguments for the import command
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file holding one tender aggregate
    file: PathBuf,
}

/// Arguments for the delete command
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Tender id
    id: i64,
}

/// One line of `list` output
#[derive(Debug, Serialize)]
pub struct TenderSummary {
    pub id: Option<i64>,
    pub process_number: String,
    pub title: String,
    pub institution: String,
    pub state: String,
    pub lots: usize,
    pub documents: usize,
    pub bidders: usize,
    pub updated_at: Option<String>,
}

impl From<&TenderRecord> for TenderSummary {
    fn from(tender: &TenderRecord) -> Self {
        Self {
            id: tender.id,
            process_number: tender.process_number.clone(),
            title: tender.title.clone(),
            institution: tender.institution.clone(),
            state: tender.state.to_string(),
            lots: tender.lots.len(),
            documents: tender.documents.len(),
            bidders: tender.bidders.len(),
            updated_at: tender.updated_at.clone(),
        }
    }
}

/// Execute the list command
pub fn list(args: ListArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    let tenders = store.load_tenders().context("Failed to load tenders")?;
    let summaries: Vec<TenderSummary> = tenders.iter().map(TenderSummary::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        print_info("No tenders stored", global.quiet);
        return Ok(());
    }

    for summary in &summaries {
        println!(
            "{:>5}  {:<20}  {:<12}  {}",
            summary.id.map(|id| id.to_string()).unwrap_or_default(),
            summary.process_number,
            summary.state,
            summary.title
        );
        if global.verbose {
            println!(
                "       {} | {} lot(s), {} document(s), {} bidder(s)",
                summary.institution, summary.lots, summary.documents, summary.bidders
            );
        }
    }
    print_info(&format!("\n{} tender(s)", summaries.len()), global.quiet);

    Ok(())
}

/// Execute the show command
pub fn show(args: ShowArgs, config: &EngineConfig, _global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    let tender = store
        .load_tender(args.id)
        .with_context(|| format!("Failed to load tender {}", args.id))?
        .ok_or_else(|| anyhow::anyhow!("Tender {} not found", args.id))?;

    println!("{}", serde_json::to_string_pretty(&tender)?);
    Ok(())
}

/// Execute the import command
pub fn import(args: ImportArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let mut tender: TenderRecord = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid tender", args.file.display()))?;

    let store = open_store(config)?;
    let existed = tender.id.is_some();
    let id = store
        .save(&mut tender)
        .with_context(|| format!("Failed to save tender '{}'", tender.process_number))?;
    info!(tender_id = id, "Imported {}", args.file.display());

    let verb = if existed { "Updated" } else { "Created" };
    print_info(
        &format!("{} tender {} ({})", verb, id, tender.process_number),
        global.quiet,
    );
    println!("{}", id);
    Ok(())
}

/// Execute the delete command
pub fn delete(args: DeleteArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    if !store
        .delete_tender(args.id)
        .with_context(|| format!("Failed to delete tender {}", args.id))?
    {
        anyhow::bail!("Tender {} not found", args.id);
    }

    print_info(&format!("Deleted tender {}", args.id), global.quiet);
    Ok(())
}
