//! Schema Manager
//!
//! Brings any earlier database layout to the current shape without losing
//! data. Runs once at startup; every step is safe to repeat on an
//! already-current database.
//!
//! Order matters:
//! 1. create missing tables
//! 2. add columns introduced after the first release
//! 3. structural repairs (superseded template layout, broken junction table)
//! 4. legacy data backfills (single-company column, `is_ours` winners)
//! 5. secondary indexes
//! 6. full-text shadow tables and triggers

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::schema::{
    ADDITIVE_COLUMNS, EXPECTED_INDEXES, SCHEMA_CREATE_TABLES, SCHEMA_VERSION, SCHEMA_VERSION_KEY,
};
use super::search::SearchIndex;
use super::session::{has_column, table_columns, table_exists, Session};
use crate::error::{Result, StoreError};

/// Summary of what an initialization run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub columns_added: Vec<String>,
    pub templates_migrated: bool,
    pub junction_repaired: bool,
    pub legacy_links_copied: usize,
    pub legacy_winners_backfilled: usize,
    pub search_index_built: bool,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        *self == MigrationReport::default()
    }
}

/// Applies schema evolution steps on the session's connection
pub struct SchemaManager<'a> {
    session: &'a Session,
}

impl<'a> SchemaManager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn conn(&self) -> &Connection {
        self.session.conn()
    }

    /// Run every step. Any failure is a fatal [`StoreError::SchemaMigration`].
    pub fn initialize(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        self.conn()
            .execute_batch(SCHEMA_CREATE_TABLES)
            .map_err(|e| StoreError::migration("create tables", e))?;

        report.columns_added = self.add_missing_columns()?;
        report.templates_migrated = self.migrate_template_layout()?;
        report.junction_repaired = self.repair_company_links()?;
        report.legacy_links_copied = self.copy_legacy_company_column()?;
        report.legacy_winners_backfilled = self.backfill_legacy_winners()?;
        self.create_indexes()?;

        report.search_index_built = SearchIndex::new(self.session)
            .install()
            .map_err(|e| match e {
                StoreError::Sqlite(source) => StoreError::migration("search index", source),
                other => other,
            })?;

        self.conn()
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value
                 WHERE settings.value <> excluded.value",
                params![SCHEMA_VERSION_KEY, SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::migration("record schema version", e))?;

        if report.is_noop() {
            debug!("schema already current");
        } else {
            info!(?report, "schema brought up to date");
        }
        Ok(report)
    }

    /// Apply [`ADDITIVE_COLUMNS`]; "duplicate column name" counts as success.
    fn add_missing_columns(&self) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for (table, definition) in ADDITIVE_COLUMNS {
            let sql = format!("ALTER TABLE {table} ADD COLUMN {definition}");
            match self.conn().execute_batch(&sql) {
                Ok(()) => {
                    let column = definition.split_whitespace().next().unwrap_or(definition);
                    info!(table, column, "added column");
                    added.push(format!("{table}.{column}"));
                }
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => return Err(StoreError::migration(format!("add column: {sql}"), e)),
            }
        }
        Ok(added)
    }

    /// Replace the superseded per-company template layout with one row per code.
    ///
    /// Detected by the presence of a `company_name` column. Obsolete triggers
    /// are dropped, the old table is renamed away, the canonical shape is
    /// recreated and rows are copied keeping the earliest id per code.
    fn migrate_template_layout(&self) -> Result<bool> {
        let conn = self.conn();
        let legacy = has_column(conn, "document_templates", "company_name")
            .map_err(|e| StoreError::migration("inspect document_templates", e))?;
        if !legacy {
            return Ok(false);
        }

        info!("migrating per-company document templates to the shared layout");
        let triggers: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = 'document_templates'",
            )
            .and_then(|mut stmt| {
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .map_err(|e| StoreError::migration("list template triggers", e))?;

        // Older template tables may lack the later descriptive columns
        let columns = table_columns(conn, "document_templates")
            .map_err(|e| StoreError::migration("inspect document_templates", e))?;
        let pick = |column: &str, present: &str, absent: &str| {
            if columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                present.to_string()
            } else {
                absent.to_string()
            }
        };
        let name = pick("name", "COALESCE(name, TRIM(code))", "TRIM(code)");
        let category = pick("category", "category", "NULL");
        let correctable = pick("correctable", "correctable", "NULL");
        let mandatory = pick("mandatory", "COALESCE(mandatory, 0)", "0");

        let mut script = String::new();
        for trigger in &triggers {
            script.push_str(&format!("DROP TRIGGER IF EXISTS \"{trigger}\";\n"));
        }
        script.push_str(&format!(
            r#"
            ALTER TABLE document_templates RENAME TO document_templates_legacy;
            CREATE TABLE document_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                category TEXT,
                correctable TEXT,
                mandatory INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO document_templates (id, code, name, category, correctable, mandatory)
            SELECT id, TRIM(code), {name}, {category}, {correctable}, {mandatory}
            FROM document_templates_legacy
            WHERE id IN (
                SELECT MIN(id) FROM document_templates_legacy
                WHERE code IS NOT NULL AND TRIM(code) <> ''
                GROUP BY TRIM(code)
            );
            DROP TABLE document_templates_legacy;
            "#
        ));

        self.run_guarded("migrate_templates", "migrate document template layout", &script)?;
        Ok(true)
    }

    /// Rebuild `tender_companies` when its composite primary key is missing.
    fn repair_company_links(&self) -> Result<bool> {
        let conn = self.conn();
        let pk_columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('tender_companies') WHERE pk > 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::migration("inspect tender_companies", e))?;
        if pk_columns >= 2 {
            return Ok(false);
        }

        info!("rebuilding tender_companies with its composite primary key");
        self.run_guarded(
            "repair_company_links",
            "repair tender_companies",
            r#"
            ALTER TABLE tender_companies RENAME TO tender_companies_broken;
            CREATE TABLE tender_companies (
                tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
                company_name TEXT NOT NULL,
                PRIMARY KEY (tender_id, company_name)
            );
            INSERT OR IGNORE INTO tender_companies (tender_id, company_name)
            SELECT DISTINCT tender_id, TRIM(company_name)
            FROM tender_companies_broken
            WHERE tender_id IS NOT NULL
              AND company_name IS NOT NULL
              AND TRIM(company_name) <> ''
              AND tender_id IN (SELECT id FROM tenders);
            DROP TABLE tender_companies_broken;
            "#,
        )?;
        Ok(true)
    }

    /// Copy the legacy single-company column into link rows for tenders that
    /// have none.
    fn copy_legacy_company_column(&self) -> Result<usize> {
        let conn = self.conn();
        let present = has_column(conn, "tenders", "company")
            .map_err(|e| StoreError::migration("inspect tenders", e))?;
        if !present {
            return Ok(0);
        }

        let step = "copy legacy tender company";
        conn.execute(
            "INSERT OR IGNORE INTO companies (name)
             SELECT DISTINCT TRIM(company) FROM tenders
             WHERE company IS NOT NULL AND TRIM(company) <> ''",
            [],
        )
        .map_err(|e| StoreError::migration(step, e))?;
        let copied = conn
            .execute(
                "INSERT OR IGNORE INTO tender_companies (tender_id, company_name)
                 SELECT t.id, TRIM(t.company) FROM tenders t
                 WHERE t.company IS NOT NULL AND TRIM(t.company) <> ''
                   AND NOT EXISTS (SELECT 1 FROM tender_companies c WHERE c.tender_id = t.id)",
                [],
            )
            .map_err(|e| StoreError::migration(step, e))?;
        if copied > 0 {
            info!(copied, "copied legacy single-company links");
        }
        Ok(copied)
    }

    /// Fill `company_name` for winners recorded with the legacy `is_ours` flag.
    fn backfill_legacy_winners(&self) -> Result<usize> {
        let conn = self.conn();
        let present = has_column(conn, "lot_winners", "is_ours")
            .map_err(|e| StoreError::migration("inspect lot_winners", e))?;
        if !present {
            return Ok(0);
        }

        let updated = conn
            .execute(
                "UPDATE lot_winners SET company_name = COALESCE(
                     (SELECT NULLIF(TRIM(l.assigned_company), '') FROM lots l
                      WHERE l.tender_id = lot_winners.tender_id
                        AND TRIM(l.number) = TRIM(lot_winners.lot_number)
                      LIMIT 1),
                     winner_name)
                 WHERE is_ours = 1 AND company_name IS NULL",
                [],
            )
            .map_err(|e| StoreError::migration("backfill legacy lot winners", e))?;
        if updated > 0 {
            info!(updated, "backfilled legacy lot winner companies");
        }
        Ok(updated)
    }

    fn create_indexes(&self) -> Result<()> {
        for index in EXPECTED_INDEXES {
            if !table_exists(self.conn(), index.table)
                .map_err(|e| StoreError::migration("inspect indexes", e))?
            {
                continue;
            }
            self.conn()
                .execute(&index.create_sql(), [])
                .map_err(|e| StoreError::migration(format!("create index {}", index.name), e))?;
        }
        Ok(())
    }

    /// Run `script` in one write scope. On failure the scope rolls back as it
    /// drops and the error is reported against `step`.
    fn run_guarded(&self, label: &'static str, step: &str, script: &str) -> Result<()> {
        let as_migration = |e: StoreError| match e {
            StoreError::Sqlite(source) => StoreError::migration(step, source),
            other => other,
        };
        let scope = self.session.write_scope(label).map_err(as_migration)?;
        self.conn()
            .execute_batch(script)
            .map_err(|e| StoreError::migration(step, e))?;
        scope.commit().map_err(as_migration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::session::StoreOptions;

    fn session() -> Session {
        Session::in_memory(&StoreOptions::default()).unwrap()
    }

    #[test]
    fn test_fresh_database_initializes() {
        let session = session();
        let report = SchemaManager::new(&session).initialize().unwrap();
        assert!(report.columns_added.is_empty());
        assert!(!report.templates_migrated);
        assert!(!report.junction_repaired);
    }

    #[test]
    fn test_second_run_is_noop() {
        let session = session();
        SchemaManager::new(&session).initialize().unwrap();
        let before = table_columns(session.conn(), "tenders").unwrap();

        let report = SchemaManager::new(&session).initialize().unwrap();
        assert!(report.is_noop(), "unexpected changes: {report:?}");
        assert_eq!(table_columns(session.conn(), "tenders").unwrap(), before);
    }

    #[test]
    fn test_adds_columns_to_old_tables() {
        let session = session();
        session
            .conn()
            .execute_batch(
                "CREATE TABLE lots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tender_id INTEGER NOT NULL,
                    number TEXT NOT NULL,
                    name TEXT,
                    base_amount REAL,
                    participating INTEGER
                );
                INSERT INTO lots (tender_id, number, name, base_amount) VALUES (1, '1', 'Old', 10.0);",
            )
            .unwrap();

        let report = SchemaManager::new(&session).initialize().unwrap();
        assert!(report.columns_added.contains(&"lots.offered_amount".to_string()));
        assert!(report.columns_added.contains(&"lots.assigned_company".to_string()));

        let name: String = session
            .conn()
            .query_row("SELECT name FROM lots", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Old");
    }

    #[test]
    fn test_repairs_junction_without_primary_key() {
        let session = session();
        session
            .conn()
            .execute_batch(
                "CREATE TABLE tenders (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL DEFAULT '',
                    process_number TEXT NOT NULL UNIQUE, institution TEXT, state TEXT NOT NULL DEFAULT 'Draft',
                    technical_phase_passed INTEGER NOT NULL DEFAULT 0);
                 INSERT INTO tenders (id, process_number) VALUES (1, 'P-1');
                 CREATE TABLE tender_companies (tender_id INTEGER, company_name TEXT);
                 INSERT INTO tender_companies VALUES (1, 'Acme'), (1, ' Acme '), (1, 'Beta'), (99, 'Ghost'), (1, NULL);",
            )
            .unwrap();

        let report = SchemaManager::new(&session).initialize().unwrap();
        assert!(report.junction_repaired);

        let rows: Vec<(i64, String)> = session
            .conn()
            .prepare("SELECT tender_id, company_name FROM tender_companies ORDER BY company_name")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![(1, "Acme".to_string()), (1, "Beta".to_string())]);

        let again = SchemaManager::new(&session).initialize().unwrap();
        assert!(!again.junction_repaired);
    }

    #[test]
    fn test_failed_template_migration_rolls_back() {
        let session = session();
        session
            .conn()
            .execute_batch(
                "CREATE TABLE document_templates (id INTEGER PRIMARY KEY, company_name TEXT,
                    code TEXT, name TEXT);
                 INSERT INTO document_templates VALUES (1, 'Acme', 'RUC', 'Tax registration');
                 CREATE TRIGGER document_templates_touch AFTER INSERT ON document_templates
                 BEGIN SELECT 1; END;
                 CREATE TABLE document_templates_legacy (id INTEGER);",
            )
            .unwrap();

        let err = SchemaManager::new(&session).initialize().unwrap_err();
        match err {
            StoreError::SchemaMigration { step, .. } => {
                assert_eq!(step, "migrate document template layout")
            }
            other => panic!("expected a migration error, got {other:?}"),
        }

        assert!(!session.in_transaction());
        let conn = session.conn();
        assert!(has_column(conn, "document_templates", "company_name").unwrap());
        let trigger: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'document_templates_touch'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(trigger, 1);
    }

    #[test]
    fn test_unexpected_failure_is_fatal() {
        let session = session();
        // A view squatting on a table name cannot be altered
        session
            .conn()
            .execute_batch("CREATE VIEW bids AS SELECT 1 AS id")
            .unwrap();

        let err = SchemaManager::new(&session).initialize().unwrap_err();
        assert!(matches!(err, StoreError::SchemaMigration { .. }));
    }
}
