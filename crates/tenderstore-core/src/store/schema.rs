//! SQLite Schema Definitions for the Tender Store
//!
//! Canonical table shapes, the additive column list used to bring older
//! databases forward, the expected secondary indexes and the full-text shadow
//! tables with their sync triggers.

/// Schema version recorded in the settings table after initialization
pub const SCHEMA_VERSION: &str = "3";

/// Settings key holding [`SCHEMA_VERSION`]
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// SQL to create every base table (idempotent)
///
/// Indexes are created separately, after column additions and structural
/// repairs, because older layouts may not carry the indexed columns yet.
pub const SCHEMA_CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tenders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    process_number TEXT NOT NULL UNIQUE,
    institution TEXT,
    state TEXT NOT NULL DEFAULT 'Draft',
    technical_phase_passed INTEGER NOT NULL DEFAULT 0,
    economic_phase_passed INTEGER NOT NULL DEFAULT 0,
    awarded INTEGER NOT NULL DEFAULT 0,
    awardee TEXT,
    disqualification_reason TEXT,
    created_on TEXT,
    schedule_json TEXT,
    evaluation_json TEXT,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS lots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    number TEXT NOT NULL,
    name TEXT,
    base_amount REAL NOT NULL DEFAULT 0,
    personal_budget_amount REAL NOT NULL DEFAULT 0,
    offered_amount REAL NOT NULL DEFAULT 0,
    participating INTEGER NOT NULL DEFAULT 1,
    phase_passed INTEGER NOT NULL DEFAULT 0,
    assigned_company TEXT
);

CREATE TABLE IF NOT EXISTS requested_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    code TEXT,
    name TEXT NOT NULL,
    category TEXT,
    comment TEXT,
    submitted INTEGER NOT NULL DEFAULT 0,
    correctable TEXT,
    file_path TEXT,
    responsible TEXT,
    reviewed INTEGER NOT NULL DEFAULT 0,
    mandatory INTEGER NOT NULL DEFAULT 0,
    order_index INTEGER NOT NULL DEFAULT 0,
    needs_correction INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bidders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    comment TEXT
);

CREATE TABLE IF NOT EXISTS bids (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bidder_id INTEGER NOT NULL REFERENCES bidders(id) ON DELETE CASCADE,
    lot_number TEXT NOT NULL,
    amount REAL,
    passed_phase_a INTEGER NOT NULL DEFAULT 0,
    delivery_term TEXT,
    warranty_months INTEGER
);

CREATE TABLE IF NOT EXISTS tender_companies (
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    company_name TEXT NOT NULL,
    PRIMARY KEY (tender_id, company_name)
);

-- Several winners may be recorded for one lot
CREATE TABLE IF NOT EXISTS lot_winners (
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    lot_number TEXT NOT NULL,
    winner_name TEXT NOT NULL,
    company_name TEXT,
    PRIMARY KEY (tender_id, lot_number, winner_name)
);

CREATE TABLE IF NOT EXISTS disqualifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    document_id INTEGER REFERENCES requested_documents(id) ON DELETE CASCADE,
    bidder_name TEXT NOT NULL DEFAULT '',
    reason TEXT
);

CREATE TABLE IF NOT EXISTS evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
    bidder_name TEXT NOT NULL,
    lot_number TEXT,
    criterion TEXT NOT NULL,
    score REAL,
    passed INTEGER,
    comment TEXT
);

CREATE TABLE IF NOT EXISTS companies (
    name TEXT PRIMARY KEY NOT NULL,
    tax_id TEXT,
    contact TEXT
);

CREATE TABLE IF NOT EXISTS institutions (
    name TEXT PRIMARY KEY NOT NULL,
    kind TEXT
);

CREATE TABLE IF NOT EXISTS document_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category TEXT,
    correctable TEXT,
    mandatory INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS competitors (
    name TEXT PRIMARY KEY NOT NULL,
    tax_id TEXT,
    comment TEXT
);

CREATE TABLE IF NOT EXISTS responsibles (
    name TEXT PRIMARY KEY NOT NULL,
    email TEXT
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Columns added after the first release, applied in order as
/// `ALTER TABLE <table> ADD COLUMN <definition>`.
///
/// Each addition is idempotent: "duplicate column name" counts as success.
pub const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("tenders", "economic_phase_passed INTEGER NOT NULL DEFAULT 0"),
    ("tenders", "awarded INTEGER NOT NULL DEFAULT 0"),
    ("tenders", "awardee TEXT"),
    ("tenders", "disqualification_reason TEXT"),
    ("tenders", "created_on TEXT"),
    ("tenders", "schedule_json TEXT"),
    ("tenders", "evaluation_json TEXT"),
    ("tenders", "updated_at TEXT"),
    ("lots", "personal_budget_amount REAL NOT NULL DEFAULT 0"),
    ("lots", "offered_amount REAL NOT NULL DEFAULT 0"),
    ("lots", "phase_passed INTEGER NOT NULL DEFAULT 0"),
    ("lots", "assigned_company TEXT"),
    ("requested_documents", "file_path TEXT"),
    ("requested_documents", "responsible TEXT"),
    ("requested_documents", "reviewed INTEGER NOT NULL DEFAULT 0"),
    ("requested_documents", "mandatory INTEGER NOT NULL DEFAULT 0"),
    ("requested_documents", "order_index INTEGER NOT NULL DEFAULT 0"),
    ("requested_documents", "needs_correction INTEGER NOT NULL DEFAULT 0"),
    ("bids", "delivery_term TEXT"),
    ("bids", "warranty_months INTEGER"),
    ("lot_winners", "company_name TEXT"),
    ("disqualifications", "bidder_name TEXT NOT NULL DEFAULT ''"),
];

/// A secondary index the auditor expects to find
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl IndexSpec {
    /// `CREATE INDEX IF NOT EXISTS` statement for this index
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({})",
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// Expected secondary indexes (foreign-key lookups)
pub const EXPECTED_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "idx_lots_tender",
        table: "lots",
        columns: &["tender_id"],
    },
    IndexSpec {
        name: "idx_documents_tender",
        table: "requested_documents",
        columns: &["tender_id"],
    },
    IndexSpec {
        name: "idx_bidders_tender",
        table: "bidders",
        columns: &["tender_id"],
    },
    IndexSpec {
        name: "idx_bids_bidder",
        table: "bids",
        columns: &["bidder_id"],
    },
    IndexSpec {
        name: "idx_disqualifications_tender",
        table: "disqualifications",
        columns: &["tender_id"],
    },
    IndexSpec {
        name: "idx_disqualifications_document",
        table: "disqualifications",
        columns: &["document_id"],
    },
    IndexSpec {
        name: "idx_evaluations_tender",
        table: "evaluations",
        columns: &["tender_id"],
    },
    IndexSpec {
        name: "idx_lot_winners_tender",
        table: "lot_winners",
        columns: &["tender_id", "lot_number"],
    },
    IndexSpec {
        name: "idx_tender_companies_company",
        table: "tender_companies",
        columns: &["company_name"],
    },
];

/// Full-text shadow tables (external content, rowid = base table id)
pub const SEARCH_CREATE_TABLES: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS tenders_fts USING fts5(
    title,
    process_number,
    institution,
    awardee,
    disqualification_reason,
    content='tenders',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE VIRTUAL TABLE IF NOT EXISTS requested_documents_fts USING fts5(
    code,
    name,
    category,
    comment,
    responsible,
    content='requested_documents',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);
"#;

/// Sync triggers; names are listed in [`SEARCH_TRIGGER_NAMES`]
pub const SEARCH_CREATE_TRIGGERS: &str = r#"
CREATE TRIGGER tenders_fts_ai AFTER INSERT ON tenders BEGIN
    INSERT INTO tenders_fts(rowid, title, process_number, institution, awardee, disqualification_reason)
    VALUES (new.id, new.title, new.process_number, new.institution, new.awardee, new.disqualification_reason);
END;

CREATE TRIGGER tenders_fts_ad AFTER DELETE ON tenders BEGIN
    INSERT INTO tenders_fts(tenders_fts, rowid, title, process_number, institution, awardee, disqualification_reason)
    VALUES ('delete', old.id, old.title, old.process_number, old.institution, old.awardee, old.disqualification_reason);
END;

CREATE TRIGGER tenders_fts_au AFTER UPDATE ON tenders BEGIN
    INSERT INTO tenders_fts(tenders_fts, rowid, title, process_number, institution, awardee, disqualification_reason)
    VALUES ('delete', old.id, old.title, old.process_number, old.institution, old.awardee, old.disqualification_reason);
    INSERT INTO tenders_fts(rowid, title, process_number, institution, awardee, disqualification_reason)
    VALUES (new.id, new.title, new.process_number, new.institution, new.awardee, new.disqualification_reason);
END;

CREATE TRIGGER requested_documents_fts_ai AFTER INSERT ON requested_documents BEGIN
    INSERT INTO requested_documents_fts(rowid, code, name, category, comment, responsible)
    VALUES (new.id, new.code, new.name, new.category, new.comment, new.responsible);
END;

CREATE TRIGGER requested_documents_fts_ad AFTER DELETE ON requested_documents BEGIN
    INSERT INTO requested_documents_fts(requested_documents_fts, rowid, code, name, category, comment, responsible)
    VALUES ('delete', old.id, old.code, old.name, old.category, old.comment, old.responsible);
END;

CREATE TRIGGER requested_documents_fts_au AFTER UPDATE ON requested_documents BEGIN
    INSERT INTO requested_documents_fts(requested_documents_fts, rowid, code, name, category, comment, responsible)
    VALUES ('delete', old.id, old.code, old.name, old.category, old.comment, old.responsible);
    INSERT INTO requested_documents_fts(rowid, code, name, category, comment, responsible)
    VALUES (new.id, new.code, new.name, new.category, new.comment, new.responsible);
END;
"#;

pub const SEARCH_TRIGGER_NAMES: &[&str] = &[
    "tenders_fts_ai",
    "tenders_fts_ad",
    "tenders_fts_au",
    "requested_documents_fts_ai",
    "requested_documents_fts_ad",
    "requested_documents_fts_au",
];

/// Shadow table → (base table, indexed columns)
pub const SEARCH_TABLES: &[(&str, &str, &[&str])] = &[
    (
        "tenders_fts",
        "tenders",
        &[
            "title",
            "process_number",
            "institution",
            "awardee",
            "disqualification_reason",
        ],
    ),
    (
        "requested_documents_fts",
        "requested_documents",
        &["code", "name", "category", "comment", "responsible"],
    ),
];

/// Column names for tender header queries (in order for row mapping)
pub const TENDER_COLUMNS: &str = "id, title, process_number, institution, state, \
     technical_phase_passed, economic_phase_passed, awarded, awardee, \
     disqualification_reason, created_on, schedule_json, evaluation_json, updated_at";

/// Column names for lot queries (in order for row mapping)
pub const LOT_COLUMNS: &str = "tender_id, number, name, base_amount, personal_budget_amount, \
     offered_amount, participating, phase_passed, assigned_company";

/// Column names for requested document queries (in order for row mapping)
pub const DOCUMENT_COLUMNS: &str = "id, tender_id, code, name, category, comment, submitted, \
     correctable, file_path, responsible, reviewed, mandatory, order_index, needs_correction";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_TABLES).unwrap();

        let tables = names(&conn, "table");
        for expected in [
            "tenders",
            "lots",
            "requested_documents",
            "bidders",
            "bids",
            "tender_companies",
            "lot_winners",
            "disqualifications",
            "evaluations",
            "companies",
            "institutions",
            "document_templates",
            "competitors",
            "responsibles",
            "settings",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_expected_indexes_apply() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_TABLES).unwrap();
        for index in EXPECTED_INDEXES {
            conn.execute(&index.create_sql(), []).unwrap();
        }

        let indexes = names(&conn, "index");
        assert!(indexes.contains(&"idx_lots_tender".to_string()));
        assert!(indexes.contains(&"idx_tender_companies_company".to_string()));
    }

    #[test]
    fn test_search_triggers_match_names() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_CREATE_TABLES).unwrap();
        conn.execute_batch(SEARCH_CREATE_TABLES).unwrap();
        conn.execute_batch(SEARCH_CREATE_TRIGGERS).unwrap();

        let triggers = names(&conn, "trigger");
        let mut expected: Vec<String> =
            SEARCH_TRIGGER_NAMES.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(triggers, expected);
    }

    #[test]
    fn test_index_create_sql() {
        let sql = EXPECTED_INDEXES
            .iter()
            .find(|i| i.name == "idx_lot_winners_tender")
            .unwrap()
            .create_sql();
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS idx_lot_winners_tender ON lot_winners(tender_id, lot_number)"
        );
    }
}
