//! Search command - full-text search and index rebuild

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tenderstore_config::EngineConfig;
use tenderstore_core::SearchHit;

use super::{open_store, print_info, store_options};
use crate::GlobalOptions;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Arguments for the search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search terms (every word must match, as a prefix)
    term: String,

    /// Maximum number of results to return (default: search.max_results)
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Output as JSON (same as `--output json`)
    #[arg(long)]
    json: bool,

    /// Output format: text (default), json
    #[arg(long, short = 'o', default_value = "text")]
    output: OutputFormat,
}

/// Arguments for the reindex command
#[derive(Args, Debug)]
pub struct ReindexArgs {}

/// Execute the search command
pub fn execute(args: SearchArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;

    let mut options = store_options(config).search;
    if let Some(limit) = args.limit {
        if limit == 0 {
            anyhow::bail!("--limit must be at least 1");
        }
        options.max_results = limit;
    }

    let hits = store
        .search_with(&args.term, &options)
        .context("Search failed")?;

    let format = if args.json {
        OutputFormat::Json
    } else {
        args.output
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&hits).context("Failed to serialize results")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            if hits.is_empty() {
                print_info(&format!("No results found for: {}", args.term), global.quiet);
                return Ok(());
            }
            if !global.quiet {
                println!("Found {} results for \"{}\":\n", hits.len(), args.term);
            }
            for (i, hit) in hits.iter().enumerate() {
                print_hit(i + 1, hit, global.verbose);
            }
        }
    }

    Ok(())
}

fn print_hit(position: usize, hit: &SearchHit, verbose: bool) {
    let location = match hit.document_id {
        Some(doc) => format!("tender {} / document {}", hit.tender_id, doc),
        None => format!("tender {}", hit.tender_id),
    };
    println!("{}. {} ({}, {})", position, hit.label, hit.kind.as_str(), location);
    println!("   {}", hit.snippet);
    if verbose {
        println!("   Rank: {:.4}", hit.rank);
    }
    println!();
}

/// Execute the reindex command
pub fn reindex(_args: ReindexArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    let store = open_store(config)?;
    let outcome = store.rebuild_search_index();

    if !outcome.ok {
        anyhow::bail!(
            "Search index rebuild failed: {}",
            outcome.message.as_deref().unwrap_or("unknown error")
        );
    }

    print_info(
        &format!("Search index rebuilt ({} rows)", outcome.indexed_rows),
        global.quiet,
    );
    Ok(())
}
