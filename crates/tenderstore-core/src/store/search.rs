//! Search Indexer
//!
//! Two FTS5 shadow tables mirror `tenders` and `requested_documents`
//! (external content, rowid = base id). Insert/update/delete triggers keep them
//! current, so writers never touch the index directly.

use std::cmp::Ordering;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::schema::{SEARCH_CREATE_TABLES, SEARCH_CREATE_TRIGGERS, SEARCH_TABLES, SEARCH_TRIGGER_NAMES};
use super::session::{table_exists, SearchOptions, Session};
use crate::error::{Result, StoreError};

/// What a search hit points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Tender,
    Document,
}

impl HitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitKind::Tender => "tender",
            HitKind::Document => "document",
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub kind: HitKind,
    /// Matching text with the highlight markers around matched terms
    pub snippet: String,
    pub label: String,
    pub tender_id: i64,
    pub document_id: Option<i64>,
    /// bm25 score; lower is more relevant
    pub rank: f64,
}

/// Result of a full index rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildOutcome {
    pub ok: bool,
    pub indexed_rows: usize,
    pub message: Option<String>,
}

pub struct SearchIndex<'a> {
    session: &'a Session,
}

impl<'a> SearchIndex<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn conn(&self) -> &Connection {
        self.session.conn()
    }

    fn shadow_tables_exist(&self) -> Result<bool> {
        for (fts, _, _) in SEARCH_TABLES {
            if !table_exists(self.conn(), fts)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Create the shadow tables if needed and (re)create the triggers.
    ///
    /// Returns `true` when the shadow tables were new and had to be populated.
    pub fn install(&self) -> Result<bool> {
        let existed = self.shadow_tables_exist()?;
        self.drop_triggers()?;
        self.conn().execute_batch(SEARCH_CREATE_TABLES)?;
        self.conn().execute_batch(SEARCH_CREATE_TRIGGERS)?;

        if existed {
            return Ok(false);
        }
        let rows = self.populate()?;
        info!(rows, "search index created");
        Ok(true)
    }

    fn drop_triggers(&self) -> Result<()> {
        for trigger in SEARCH_TRIGGER_NAMES {
            self.conn()
                .execute_batch(&format!("DROP TRIGGER IF EXISTS {trigger}"))?;
        }
        Ok(())
    }

    /// Fill the shadow tables from the base tables; returns the indexed row count.
    ///
    /// Uses the FTS5 `rebuild` command and falls back to copying rows by hand
    /// when the command is rejected.
    fn populate(&self) -> Result<usize> {
        let mut total = 0usize;
        for (fts, base, columns) in SEARCH_TABLES {
            let bulk = format!("INSERT INTO {fts}({fts}) VALUES ('rebuild')");
            if let Err(e) = self.conn().execute(&bulk, []) {
                warn!(table = fts, error = %e, "bulk rebuild unavailable, copying rows");
                self.copy_rows(fts, base, columns)?;
            }
            let count: i64 =
                self.conn()
                    .query_row(&format!("SELECT COUNT(*) FROM {base}"), [], |r| r.get(0))?;
            total += count as usize;
        }
        Ok(total)
    }

    /// Index every row of `base` into the empty shadow table `fts` one by one.
    fn copy_rows(&self, fts: &str, base: &str, columns: &[&str]) -> Result<usize> {
        let cols = columns.join(", ");
        let copied = self.conn().execute(
            &format!("INSERT INTO {fts}(rowid, {cols}) SELECT id, {cols} FROM {base}"),
            [],
        )?;
        debug!(table = fts, copied, "shadow rows copied");
        Ok(copied)
    }

    /// Drop and recreate the shadow tables and triggers, then repopulate.
    pub fn rebuild(&self) -> RebuildOutcome {
        match self.try_rebuild() {
            Ok(indexed_rows) => {
                info!(indexed_rows, "search index rebuilt");
                RebuildOutcome {
                    ok: true,
                    indexed_rows,
                    message: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "search index rebuild failed");
                RebuildOutcome {
                    ok: false,
                    indexed_rows: 0,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    fn try_rebuild(&self) -> Result<usize> {
        let scope = self.session.write_scope("rebuild_search")?;
        self.drop_triggers()?;
        for (fts, _, _) in SEARCH_TABLES {
            self.conn()
                .execute_batch(&format!("DROP TABLE IF EXISTS {fts}"))?;
        }
        self.conn().execute_batch(SEARCH_CREATE_TABLES)?;
        self.conn().execute_batch(SEARCH_CREATE_TRIGGERS)?;
        let rows = self.populate()?;
        scope.commit()?;
        Ok(rows)
    }

    /// Problems found by FTS5 `integrity-check`; empty when the index is sound.
    pub fn integrity_issues(&self) -> Result<Vec<String>> {
        let mut issues = Vec::new();
        for (fts, _, _) in SEARCH_TABLES {
            if !table_exists(self.conn(), fts)? {
                issues.push(format!("shadow table {fts} is missing"));
                continue;
            }
            let check = format!("INSERT INTO {fts}({fts}) VALUES ('integrity-check')");
            if let Err(e) = self.conn().execute(&check, []) {
                issues.push(format!("{fts}: {e}"));
            }
        }
        for trigger in SEARCH_TRIGGER_NAMES {
            let present = self
                .conn()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?1",
                    [trigger],
                    |r| r.get::<_, i64>(0),
                )?
                > 0;
            if !present {
                issues.push(format!("sync trigger {trigger} is missing"));
            }
        }
        Ok(issues)
    }

    /// Ranked matches across tenders and requested documents.
    pub fn search(&self, term: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let Some(query) = match_expression(term) else {
            return Ok(Vec::new());
        };
        debug!(%query, "full-text search");

        let limit = options.max_results as i64;
        let tokens = options.snippet_tokens.clamp(1, 64) as i64;
        let mut hits = self
            .query(
                "SELECT 'tender', snippet(tenders_fts, -1, ?2, ?3, ?4, ?5),
                        t.title || ' (' || t.process_number || ')',
                        t.id, NULL, bm25(tenders_fts)
                 FROM tenders_fts JOIN tenders t ON t.id = tenders_fts.rowid
                 WHERE tenders_fts MATCH ?1
                 ORDER BY bm25(tenders_fts) LIMIT ?6",
                &query,
                options,
                tokens,
                limit,
            )?;
        hits.extend(self.query(
            "SELECT 'document', snippet(requested_documents_fts, -1, ?2, ?3, ?4, ?5),
                    COALESCE(NULLIF(TRIM(d.code), '') || ' - ', '') || d.name,
                    d.tender_id, d.id, bm25(requested_documents_fts)
             FROM requested_documents_fts
             JOIN requested_documents d ON d.id = requested_documents_fts.rowid
             WHERE requested_documents_fts MATCH ?1
             ORDER BY bm25(requested_documents_fts) LIMIT ?6",
            &query,
            options,
            tokens,
            limit,
        )?);

        hits.sort_by(|a, b| a.rank.partial_cmp(&b.rank).unwrap_or(Ordering::Equal));
        hits.truncate(options.max_results);
        Ok(hits)
    }

    fn query(
        &self,
        sql: &str,
        query: &str,
        options: &SearchOptions,
        tokens: i64,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let run = || -> rusqlite::Result<Vec<SearchHit>> {
            let mut stmt = self.conn().prepare(sql)?;
            let rows = stmt.query_map(
                params![
                    query,
                    options.highlight_open,
                    options.highlight_close,
                    options.ellipsis,
                    tokens,
                    limit
                ],
                |row| {
                    let kind: String = row.get(0)?;
                    Ok(SearchHit {
                        kind: if kind == "document" {
                            HitKind::Document
                        } else {
                            HitKind::Tender
                        },
                        snippet: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        label: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        tender_id: row.get(3)?,
                        document_id: row.get(4)?,
                        rank: row.get(5)?,
                    })
                },
            )?;
            let hits = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        };
        run().map_err(classify_search_error)
    }
}

/// Build an FTS5 expression: every whitespace token quoted and prefix-matched,
/// all tokens required. `None` for a blank term.
pub fn match_expression(term: &str) -> Option<String> {
    let tokens: Vec<String> = term
        .split_whitespace()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn classify_search_error(err: rusqlite::Error) -> StoreError {
    let msg = err.to_string();
    let index_problem = msg.contains("no such table")
        || msg.contains("malformed")
        || msg.contains("fts5")
        || msg.contains("vtable constructor failed");
    if index_problem {
        StoreError::IndexCorruption(msg)
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::session::StoreOptions;

    fn indexed_session() -> Session {
        let session = Session::in_memory(&StoreOptions::default()).unwrap();
        session
            .conn()
            .execute_batch(super::super::schema::SCHEMA_CREATE_TABLES)
            .unwrap();
        SearchIndex::new(&session).install().unwrap();
        session
            .conn()
            .execute_batch(
                "INSERT INTO tenders (id, title, process_number, institution)
                     VALUES (1, 'Hospital cleaning services', 'HC-01', 'Ministry of Health');
                 INSERT INTO requested_documents (id, tender_id, code, name, comment)
                     VALUES (10, 1, 'D-1', 'Insurance policy', 'original notarized copy');",
            )
            .unwrap();
        session
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(match_expression("  "), None);
        assert_eq!(
            match_expression("road \"works"),
            Some("\"road\"* \"\"\"works\"*".to_string())
        );
    }

    #[test]
    fn test_search_finds_tender_and_document() {
        let session = indexed_session();
        let index = SearchIndex::new(&session);
        let options = SearchOptions::default();

        let hits = index.search("hospital", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, HitKind::Tender);
        assert_eq!(hits[0].label, "Hospital cleaning services (HC-01)");
        assert!(hits[0].snippet.contains("[Hospital]"));

        let hits = index.search("notariz", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, HitKind::Document);
        assert_eq!(hits[0].document_id, Some(10));
        assert_eq!(hits[0].tender_id, 1);
        assert_eq!(hits[0].label, "D-1 - Insurance policy");
    }

    #[test]
    fn test_triggers_follow_updates_and_deletes() {
        let session = indexed_session();
        let index = SearchIndex::new(&session);
        let options = SearchOptions::default();

        session
            .conn()
            .execute("UPDATE tenders SET title = 'Bridge repair' WHERE id = 1", [])
            .unwrap();
        assert!(index.search("hospital", &options).unwrap().is_empty());
        assert_eq!(index.search("bridge", &options).unwrap().len(), 1);

        session
            .conn()
            .execute("DELETE FROM requested_documents WHERE id = 10", [])
            .unwrap();
        assert!(index.search("insurance", &options).unwrap().is_empty());
        assert!(index.integrity_issues().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_counts_rows() {
        let session = indexed_session();
        let outcome = SearchIndex::new(&session).rebuild();
        assert!(outcome.ok);
        assert_eq!(outcome.indexed_rows, 2);
        assert_eq!(
            SearchIndex::new(&session)
                .search("policy", &SearchOptions::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_row_copy_fills_fresh_shadow_tables() {
        let session = indexed_session();
        let index = SearchIndex::new(&session);
        index.drop_triggers().unwrap();
        for (fts, _, _) in SEARCH_TABLES {
            session
                .conn()
                .execute_batch(&format!("DROP TABLE {fts}"))
                .unwrap();
        }
        session.conn().execute_batch(SEARCH_CREATE_TABLES).unwrap();

        let copied: Vec<usize> = SEARCH_TABLES
            .iter()
            .map(|(fts, base, columns)| index.copy_rows(fts, base, columns).unwrap())
            .collect();
        assert_eq!(copied, vec![1, 1]);

        session.conn().execute_batch(SEARCH_CREATE_TRIGGERS).unwrap();
        let options = SearchOptions::default();
        assert_eq!(index.search("hospital", &options).unwrap().len(), 1);
        let hits = index.search("notarized", &options).unwrap();
        assert_eq!(hits[0].document_id, Some(10));
        assert!(index.integrity_issues().unwrap().is_empty());
    }

    #[test]
    fn test_missing_index_reports_corruption() {
        let session = indexed_session();
        session
            .conn()
            .execute_batch(
                "DROP TRIGGER tenders_fts_ai; DROP TRIGGER tenders_fts_ad; DROP TRIGGER tenders_fts_au;
                 DROP TABLE tenders_fts;",
            )
            .unwrap();
        let index = SearchIndex::new(&session);

        let err = index.search("hospital", &SearchOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::IndexCorruption(_)));
        assert!(!index.integrity_issues().unwrap().is_empty());

        assert!(index.rebuild().ok);
        assert!(index.integrity_issues().unwrap().is_empty());
    }
}
