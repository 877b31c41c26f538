//! Migrate command - create or upgrade the database schema

use anyhow::Result;
use clap::Args;
use tenderstore_config::EngineConfig;
use tenderstore_core::MigrationReport;

use super::open_store;
use crate::GlobalOptions;

/// Arguments for the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {}

/// Execute the migrate command
pub fn execute(_args: MigrateArgs, config: &EngineConfig, global: GlobalOptions) -> Result<()> {
    // Opening the store runs every schema step
    let store = open_store(config)?;
    let report = store.migration_report();

    if global.quiet {
        return Ok(());
    }

    let lines = describe(report);
    if lines.is_empty() {
        println!("Database is up to date");
    } else {
        println!("Database migrated:");
        for line in lines {
            println!("  - {}", line);
        }
    }
    Ok(())
}

fn describe(report: &MigrationReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.columns_added.is_empty() {
        lines.push(format!("added columns {}", report.columns_added.join(", ")));
    }
    if report.templates_migrated {
        lines.push("merged per-company document templates into one catalog".to_string());
    }
    if report.junction_repaired {
        lines.push("repaired the tender/company link table".to_string());
    }
    if report.legacy_links_copied > 0 {
        lines.push(format!(
            "linked {} legacy tender company value(s)",
            report.legacy_links_copied
        ));
    }
    if report.legacy_winners_backfilled > 0 {
        lines.push(format!(
            "backfilled {} legacy lot winner(s)",
            report.legacy_winners_backfilled
        ));
    }
    if report.search_index_built {
        lines.push("built the search index".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_noop_report() {
        assert!(describe(&MigrationReport::default()).is_empty());
    }

    #[test]
    fn test_describe_lists_each_change() {
        let report = MigrationReport {
            columns_added: vec!["lots.company".to_string(), "bidders.comment".to_string()],
            legacy_winners_backfilled: 2,
            search_index_built: true,
            ..Default::default()
        };

        let lines = describe(&report);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "added columns lots.company, bidders.comment");
        assert!(lines[1].contains("2 legacy lot winner"));
    }
}
