//! Consistency Auditor
//!
//! Finds child rows whose parent is gone, expected indexes that are missing and
//! problems in the full-text shadow tables, and repairs what it found.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::schema::{IndexSpec, EXPECTED_INDEXES};
use super::search::SearchIndex;
use super::session::{table_exists, Session};
use crate::error::Result;

/// A child → parent reference checked for orphans
struct ParentRef {
    table: &'static str,
    column: &'static str,
    parent: &'static str,
    /// NULL is allowed and does not count as an orphan
    nullable: bool,
}

const fn tender_child(table: &'static str) -> ParentRef {
    ParentRef {
        table,
        column: "tender_id",
        parent: "tenders",
        nullable: false,
    }
}

const PARENT_REFS: &[ParentRef] = &[
    tender_child("lots"),
    tender_child("requested_documents"),
    tender_child("bidders"),
    tender_child("disqualifications"),
    tender_child("evaluations"),
    tender_child("tender_companies"),
    tender_child("lot_winners"),
    ParentRef {
        table: "bids",
        column: "bidder_id",
        parent: "bidders",
        nullable: false,
    },
    ParentRef {
        table: "disqualifications",
        column: "document_id",
        parent: "requested_documents",
        nullable: true,
    },
];

/// (parent table, child table, child column) removed ahead of orphaned parents
const DEPENDENTS: &[(&str, &str, &str)] = &[
    ("requested_documents", "disqualifications", "document_id"),
    ("bidders", "bids", "bidder_id"),
];

/// Findings of [`ConsistencyAuditor::run_checks`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    /// Table → rowids of rows whose parent does not exist
    pub orphans: BTreeMap<String, Vec<i64>>,
    pub missing_indexes: Vec<IndexSpec>,
    pub search_index_issues: Vec<String>,
}

impl AuditReport {
    pub fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.orphan_count() == 0
            && self.missing_indexes.is_empty()
            && self.search_index_issues.is_empty()
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("no issues found");
        }
        for (table, rows) in self.orphans.iter().filter(|(_, rows)| !rows.is_empty()) {
            writeln!(f, "{} orphan row(s) in {table}", rows.len())?;
        }
        for index in &self.missing_indexes {
            writeln!(f, "missing index {} on {}", index.name, index.table)?;
        }
        for issue in &self.search_index_issues {
            writeln!(f, "search index: {issue}")?;
        }
        Ok(())
    }
}

/// Result of [`ConsistencyAuditor::auto_repair`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub ok: bool,
    pub message: String,
}

pub struct ConsistencyAuditor<'a> {
    session: &'a Session,
}

impl<'a> ConsistencyAuditor<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn conn(&self) -> &Connection {
        self.session.conn()
    }

    pub fn run_checks(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for check in PARENT_REFS {
            let rows = self.orphan_rows(check)?;
            if rows.is_empty() {
                continue;
            }
            let entry = report.orphans.entry(check.table.to_string()).or_default();
            let merged: BTreeSet<i64> = entry.iter().copied().chain(rows).collect();
            *entry = merged.into_iter().collect();
        }

        for index in EXPECTED_INDEXES {
            if !table_exists(self.conn(), index.table)? {
                continue;
            }
            let present = self
                .conn()
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
                    [index.name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !present {
                report.missing_indexes.push(index.clone());
            }
        }

        report.search_index_issues = SearchIndex::new(self.session).integrity_issues()?;

        if report.is_clean() {
            debug!("consistency checks passed");
        } else {
            info!(
                orphans = report.orphan_count(),
                missing_indexes = report.missing_indexes.len(),
                search_issues = report.search_index_issues.len(),
                "consistency checks found issues"
            );
        }
        Ok(report)
    }

    fn orphan_rows(&self, check: &ParentRef) -> Result<Vec<i64>> {
        let conn = self.conn();
        if !table_exists(conn, check.table)? || !table_exists(conn, check.parent)? {
            return Ok(Vec::new());
        }
        let ParentRef {
            table,
            column,
            parent,
            nullable,
        } = check;
        let missing_parent =
            format!("NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.id = c.{column})");
        let condition = if *nullable {
            format!("c.{column} IS NOT NULL AND {missing_parent}")
        } else {
            format!("c.{column} IS NULL OR {missing_parent}")
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT c.rowid FROM {table} c WHERE {condition} ORDER BY c.rowid"
        ))?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
    }

    /// Delete every reported orphan and create every reported missing index in
    /// one transaction, then rebuild the search index if it was reported broken.
    pub fn auto_repair(&self, report: &AuditReport) -> RepairOutcome {
        let mut actions = match self.repair_structure(report) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "repair rolled back");
                return RepairOutcome {
                    ok: false,
                    message: format!("repair failed, nothing was changed: {e}"),
                };
            }
        };

        let mut ok = true;
        if !report.search_index_issues.is_empty() {
            let outcome = SearchIndex::new(self.session).rebuild();
            if outcome.ok {
                actions.push(format!(
                    "rebuilt the search index ({} rows)",
                    outcome.indexed_rows
                ));
            } else {
                ok = false;
                actions.push(format!(
                    "search index rebuild failed: {}",
                    outcome.message.unwrap_or_default()
                ));
            }
        }

        let message = if actions.is_empty() {
            "nothing to repair".to_string()
        } else {
            actions.join("; ")
        };
        info!(ok, %message, "repair finished");
        RepairOutcome { ok, message }
    }

    fn repair_structure(&self, report: &AuditReport) -> Result<Vec<String>> {
        let mut actions = Vec::new();
        if report.orphan_count() == 0 && report.missing_indexes.is_empty() {
            return Ok(actions);
        }

        let scope = self.session.write_scope("auto_repair")?;
        let conn = self.conn();

        // Rows hanging off orphans about to go; migrated tables may not cascade
        let mut dependents = 0;
        for (parent, child, column) in DEPENDENTS {
            let Some(ids) = report.orphans.get(*parent) else {
                continue;
            };
            let sql = format!("DELETE FROM {child} WHERE {column} = ?1");
            for id in ids {
                dependents += conn.execute(&sql, [id])?;
            }
        }

        let mut deleted = 0;
        for (table, rows) in &report.orphans {
            if !PARENT_REFS.iter().any(|r| r.table == table.as_str()) {
                warn!(table, "ignoring orphans reported for an unchecked table");
                continue;
            }
            let sql = format!("DELETE FROM {table} WHERE rowid = ?1");
            for rowid in rows {
                deleted += conn.execute(&sql, [rowid])?;
            }
        }
        if deleted > 0 {
            actions.push(format!("deleted {deleted} orphan row(s)"));
        }
        if dependents > 0 {
            actions.push(format!("deleted {dependents} dependent row(s)"));
        }

        for index in &report.missing_indexes {
            conn.execute(&index.create_sql(), [])?;
            actions.push(format!("created index {}", index.name));
        }

        scope.commit()?;
        Ok(actions)
    }
}
