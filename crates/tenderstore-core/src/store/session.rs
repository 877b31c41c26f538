//! Session handle over the single SQLite connection
//!
//! Every component borrows the [`Session`] instead of reaching for ambient
//! state. Writes go through [`Session::write_scope`], which begins an
//! immediate transaction or, when the caller already holds one, a savepoint.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use tracing::{debug, warn};

use crate::error::Result;

/// Connection and search tuning for a store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for a competing lock before failing
    pub busy_timeout: Duration,
    /// Use write-ahead logging for file databases
    pub wal: bool,
    pub search: SearchOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            wal: true,
            search: SearchOptions::default(),
        }
    }
}

/// Ranking and snippet settings for full-text queries
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub snippet_tokens: u32,
    pub highlight_open: String,
    pub highlight_close: String,
    pub ellipsis: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            snippet_tokens: 12,
            highlight_open: "[".to_string(),
            highlight_close: "]".to_string(),
            ellipsis: "…".to_string(),
        }
    }
}

/// The process-wide connection to the tender database
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Open (or create) a database file.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, options, true)?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database (for testing)
    pub fn in_memory(options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, options, false)?;
        Ok(Self { conn })
    }

    fn configure_connection(
        conn: &Connection,
        options: &StoreOptions,
        file_backed: bool,
    ) -> SqliteResult<()> {
        if file_backed && options.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "journal mode configured");
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // Lock contention retries for up to this long instead of failing at once
        conn.busy_timeout(options.busy_timeout)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Whether a transaction is already open on this connection.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Start an atomic unit of work.
    ///
    /// Outside a transaction this issues `BEGIN IMMEDIATE` so the write lock is
    /// taken up front. Inside one (reentrant use) it opens a savepoint named
    /// after `label`, so a failure still undoes only this unit.
    pub fn write_scope(&self, label: &'static str) -> Result<WriteScope<'_>> {
        let kind = if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            ScopeKind::Transaction
        } else {
            self.conn.execute_batch(&format!("SAVEPOINT {label}"))?;
            ScopeKind::Savepoint
        };
        debug!(scope = label, ?kind, "write scope opened");
        Ok(WriteScope {
            conn: &self.conn,
            label,
            kind,
            finished: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Transaction,
    Savepoint,
}

/// An open write scope. Rolls back on drop unless [`WriteScope::commit`] ran.
pub struct WriteScope<'a> {
    conn: &'a Connection,
    label: &'static str,
    kind: ScopeKind,
    finished: bool,
}

impl WriteScope<'_> {
    pub fn commit(mut self) -> Result<()> {
        let sql = match self.kind {
            ScopeKind::Transaction => "COMMIT".to_string(),
            ScopeKind::Savepoint => format!("RELEASE {}", self.label),
        };
        self.conn.execute_batch(&sql)?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch(&self.rollback_sql())?;
        Ok(())
    }

    fn rollback_sql(&self) -> String {
        match self.kind {
            ScopeKind::Transaction => "ROLLBACK".to_string(),
            ScopeKind::Savepoint => format!("ROLLBACK TO {0}; RELEASE {0}", self.label),
        }
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch(&self.rollback_sql()) {
            warn!(scope = self.label, error = %e, "rollback failed");
        }
    }
}

/// Whether `table` exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> SqliteResult<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Column names of `table`, in declaration order. Empty when the table is missing.
pub fn table_columns(conn: &Connection, table: &str) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<SqliteResult<Vec<String>>>()?;
    Ok(columns)
}

pub fn has_column(conn: &Connection, table: &str, column: &str) -> SqliteResult<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|c| c.eq_ignore_ascii_case(column)))
}

/// A fresh concurrency token (UTC, microsecond precision).
///
/// Two saves inside the same microsecond produce equal tokens.
pub fn fresh_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let session = Session::in_memory(&StoreOptions::default()).unwrap();
        session
            .conn()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();
        session
    }

    fn count(session: &Session) -> i64 {
        session
            .conn()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_persists() {
        let session = session();
        let scope = session.write_scope("test").unwrap();
        session.conn().execute("INSERT INTO t VALUES (1)", []).unwrap();
        scope.commit().unwrap();
        assert_eq!(count(&session), 1);
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_drop_rolls_back() {
        let session = session();
        {
            let _scope = session.write_scope("test").unwrap();
            session.conn().execute("INSERT INTO t VALUES (1)", []).unwrap();
        }
        assert_eq!(count(&session), 0);
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_nested_scope_uses_savepoint() {
        let session = session();
        let outer = session.write_scope("outer").unwrap();
        session.conn().execute("INSERT INTO t VALUES (1)", []).unwrap();

        let inner = session.write_scope("inner").unwrap();
        session.conn().execute("INSERT INTO t VALUES (2)", []).unwrap();
        inner.rollback().unwrap();

        // Outer transaction is still open and keeps its own work
        assert!(session.in_transaction());
        outer.commit().unwrap();
        assert_eq!(count(&session), 1);
    }

    #[test]
    fn test_column_introspection() {
        let session = session();
        assert!(table_exists(session.conn(), "t").unwrap());
        assert!(!table_exists(session.conn(), "nope").unwrap());
        assert_eq!(table_columns(session.conn(), "t").unwrap(), vec!["v"]);
        assert!(has_column(session.conn(), "t", "V").unwrap());
        assert!(table_columns(session.conn(), "nope").unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = fresh_timestamp();
        assert_eq!(ts.len(), "2024-01-01 00:00:00.000000".len());
    }
}
