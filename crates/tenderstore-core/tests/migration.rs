//! Schema evolution tests against databases written by earlier releases.
//!
//! Each test lays down an old layout with plain SQL, opens it through
//! `TenderStore` and checks what the migration produced.

mod common;

use pretty_assertions::assert_eq;
use rusqlite::Connection;
use tempfile::TempDir;

use common::{count, file_store, sample_tender};
use tenderstore_core::store::session::table_columns;
use tenderstore_core::store::{GraphLoader, Session};
use tenderstore_core::{Correctability, DocumentTemplate, StoreError, StoreOptions, TenderStore};

// ============================================================================
// Test Helpers
// ============================================================================

/// The first release: a single company per tender, `is_ours` winners and
/// templates kept per company.
const FIRST_RELEASE_SCHEMA: &str = r#"
CREATE TABLE tenders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    process_number TEXT NOT NULL UNIQUE,
    institution TEXT,
    state TEXT NOT NULL DEFAULT 'Draft',
    technical_phase_passed INTEGER NOT NULL DEFAULT 0,
    company TEXT
);
CREATE TABLE lots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL,
    number TEXT NOT NULL,
    name TEXT,
    base_amount REAL,
    participating INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE requested_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL,
    code TEXT,
    name TEXT NOT NULL,
    category TEXT,
    comment TEXT,
    submitted INTEGER NOT NULL DEFAULT 0,
    correctable TEXT
);
CREATE TABLE bidders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tender_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    comment TEXT
);
CREATE TABLE bids (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bidder_id INTEGER NOT NULL,
    lot_number TEXT NOT NULL,
    amount REAL,
    passed_phase_a INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE lot_winners (
    tender_id INTEGER NOT NULL,
    lot_number TEXT NOT NULL,
    winner_name TEXT NOT NULL,
    is_ours INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tender_id, lot_number, winner_name)
);
CREATE TABLE document_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_name TEXT NOT NULL,
    code TEXT NOT NULL,
    name TEXT,
    UNIQUE (company_name, code)
);
CREATE TRIGGER document_templates_touch AFTER INSERT ON document_templates BEGIN
    SELECT 1;
END;

INSERT INTO tenders (id, title, process_number, institution, state, company)
    VALUES (1, 'School meals', 'OLD-001', 'City Council', 'Submitted', ' Acme ');
INSERT INTO lots (tender_id, number, name, base_amount) VALUES (1, '2', 'Dinner', '1,500.75');
INSERT INTO lots (tender_id, number, name, base_amount) VALUES (1, '1', 'Lunch', 2000);
INSERT INTO requested_documents (tender_id, code, name, comment, submitted, correctable)
    VALUES (1, 'RUC', 'Tax registration', 'certified copy', 1, 'No');
INSERT INTO bidders (id, tender_id, name) VALUES (1, 1, 'Acme');
INSERT INTO bidders (id, tender_id, name) VALUES (2, 1, 'Rival');
INSERT INTO bids (bidder_id, lot_number, amount, passed_phase_a) VALUES (1, '1', 1990, 1);
INSERT INTO bids (bidder_id, lot_number, amount, passed_phase_a) VALUES (2, '2', 1400, 'true');
INSERT INTO lot_winners VALUES (1, '1', 'Acme', 1);
INSERT INTO lot_winners VALUES (1, '2', 'Rival', 0);
INSERT INTO document_templates (id, company_name, code, name) VALUES (1, 'Acme', 'RUC', 'Tax registration');
INSERT INTO document_templates (id, company_name, code, name) VALUES (2, 'Beta', 'RUC', 'Tax registration copy');
INSERT INTO document_templates (id, company_name, code, name) VALUES (3, 'Acme', 'CV', 'Resume');
INSERT INTO document_templates (id, company_name, code, name) VALUES (4, 'Beta', ' CV ', NULL);
"#;

fn first_release_db(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("legacy.db");
    let conn = Connection::open(&path).expect("Failed to create legacy database");
    conn.execute_batch(FIRST_RELEASE_SCHEMA)
        .expect("Failed to lay down legacy schema");
    path
}

// ============================================================================
// Legacy Layouts
// ============================================================================

#[test]
fn test_first_release_database_migrates() {
    let dir = TempDir::new().unwrap();
    let path = first_release_db(&dir);

    let store = file_store(&path);
    let report = store.migration_report().clone();
    assert!(report.templates_migrated);
    assert!(!report.junction_repaired);
    assert_eq!(report.legacy_links_copied, 1);
    assert_eq!(report.legacy_winners_backfilled, 1);
    assert!(report.search_index_built);
    assert!(report.columns_added.contains(&"tenders.updated_at".to_string()));
    assert!(report
        .columns_added
        .contains(&"lot_winners.company_name".to_string()));

    let tender = store.load_tender(1).unwrap().expect("legacy tender missing");
    assert_eq!(tender.state.as_str(), "Submitted");
    assert_eq!(tender.updated_at, None);
    assert_eq!(
        tender.our_companies.iter().collect::<Vec<_>>(),
        vec!["Acme"]
    );

    let numbers: Vec<_> = tender.lots.iter().map(|l| l.number.as_str()).collect();
    assert_eq!(numbers, vec!["1", "2"]);
    assert_eq!(tender.lots[1].base_amount, 1500.75);
    assert_eq!(tender.lots[0].winner_name, "Acme");
    assert!(tender.lots[0].won_by_us);
    assert_eq!(tender.lots[1].winner_name, "Rival");
    assert!(!tender.lots[1].won_by_us);
    assert_eq!(tender.lot_winners[0].company_name.as_deref(), Some("Acme"));
    assert_eq!(tender.lot_winners[1].company_name, None);

    assert!(tender.bidders[0].bids[0].winner);
    assert!(tender.bidders[1].bids[0].passed_phase_a);
    assert!(tender.bidders[1].bids[0].winner);
    assert_eq!(
        tender.documents[0].correctable,
        Correctability::NotCorrectable
    );

    // Old rows are searchable straight away
    assert_eq!(store.search("certified").unwrap().len(), 1);
}

#[test]
fn test_template_layout_deduplicates_by_code() {
    let dir = TempDir::new().unwrap();
    let path = first_release_db(&dir);
    let store = file_store(&path);

    let templates: Vec<DocumentTemplate> = store.catalog().list().unwrap();
    let rows: Vec<_> = templates
        .iter()
        .map(|t| (t.id, t.code.as_str(), t.name.as_str()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (Some(3), "CV", "Resume"),
            (Some(1), "RUC", "Tax registration")
        ]
    );

    let columns = table_columns(store.connection(), "document_templates").unwrap();
    assert!(!columns.iter().any(|c| c == "company_name"));
    assert_eq!(
        count(
            store.connection(),
            "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('document_templates_legacy', 'document_templates_touch')"
        ),
        0
    );
}

#[test]
fn test_saving_clears_legacy_company_column() {
    let dir = TempDir::new().unwrap();
    let path = first_release_db(&dir);

    {
        let store = file_store(&path);
        let mut tender = store.load_tender(1).unwrap().unwrap();
        tender.our_companies.clear();
        store.save(&mut tender).unwrap();
        assert!(tender.updated_at.is_some());
    }

    let store = file_store(&path);
    assert_eq!(store.migration_report().legacy_links_copied, 0);
    let tender = store.load_tender(1).unwrap().unwrap();
    assert!(tender.our_companies.is_empty());
    let legacy: Option<String> = store
        .connection()
        .query_row("SELECT company FROM tenders WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(legacy, None);
}

#[test]
fn test_migrated_database_accepts_new_aggregates() {
    let dir = TempDir::new().unwrap();
    let path = first_release_db(&dir);
    let store = file_store(&path);

    let mut tender = sample_tender("NEW-001");
    let id = store.save(&mut tender).unwrap();
    assert_eq!(store.load_tender(id).unwrap(), Some(tender));
}

#[test]
fn test_repair_on_migrated_database_takes_orphan_bids_along() {
    let dir = TempDir::new().unwrap();
    let path = first_release_db(&dir);
    let store = file_store(&path);
    // Legacy tables declare no foreign keys, so nothing cascades
    store
        .connection()
        .execute_batch(
            "INSERT INTO bidders (id, tender_id, name) VALUES (5, 999, 'Vanished');
             INSERT INTO bids (bidder_id, lot_number, amount) VALUES (5, '1', 10);",
        )
        .unwrap();

    let report = store.run_checks().unwrap();
    assert_eq!(report.orphans.get("bidders"), Some(&vec![5]));
    assert!(!report.orphans.contains_key("bids"));

    let outcome = store.auto_repair(&report);
    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(
        outcome.message,
        "deleted 1 orphan row(s); deleted 1 dependent row(s)"
    );

    let after = store.run_checks().unwrap();
    assert!(after.is_clean(), "{after}");
    assert_eq!(
        count(store.connection(), "SELECT COUNT(*) FROM bids WHERE bidder_id = 5"),
        0
    );
    // The legacy tender's own bids stay
    assert_eq!(count(store.connection(), "SELECT COUNT(*) FROM bids"), 2);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_reinitializing_current_database_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("current.db");

    let before = {
        let store = file_store(&path);
        let mut tender = sample_tender("LP-IDEM");
        store.save(&mut tender).unwrap();
        store.load_all().unwrap()
    };
    let columns_before = table_columns(&Connection::open(&path).unwrap(), "tenders").unwrap();

    for _ in 0..2 {
        let store = file_store(&path);
        assert!(
            store.migration_report().is_noop(),
            "{:?}",
            store.migration_report()
        );
        assert_eq!(store.load_all().unwrap(), before);
    }
    let columns_after = table_columns(&Connection::open(&path).unwrap(), "tenders").unwrap();
    assert_eq!(columns_after, columns_before);
}

#[test]
fn test_broken_schema_is_fatal_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE VIEW lots AS SELECT 1 AS id")
        .unwrap();

    match TenderStore::open(&path, StoreOptions::default()) {
        Err(StoreError::SchemaMigration { step, .. }) => assert!(step.contains("lots"), "{step}"),
        Err(other) => panic!("expected a migration error, got {other:?}"),
        Ok(_) => panic!("expected a migration error"),
    }
}

// ============================================================================
// Degraded Reads
// ============================================================================

#[test]
fn test_loader_tolerates_missing_optional_tables() {
    let session = Session::in_memory(&StoreOptions::default()).unwrap();
    session
        .conn()
        .execute_batch(
            "CREATE TABLE tenders (id INTEGER PRIMARY KEY, title TEXT, process_number TEXT,
                institution TEXT, state TEXT, technical_phase_passed INTEGER,
                economic_phase_passed INTEGER, awarded INTEGER, awardee TEXT,
                disqualification_reason TEXT, created_on TEXT, schedule_json TEXT,
                evaluation_json TEXT, updated_at TEXT);
             CREATE TABLE lots (id INTEGER PRIMARY KEY, tender_id INTEGER, number TEXT, name TEXT,
                base_amount REAL, personal_budget_amount REAL, offered_amount REAL,
                participating INTEGER, phase_passed INTEGER, assigned_company TEXT);
             CREATE TABLE requested_documents (id INTEGER PRIMARY KEY, tender_id INTEGER, code TEXT,
                name TEXT, category TEXT, comment TEXT, submitted INTEGER, correctable TEXT,
                file_path TEXT, responsible TEXT, reviewed INTEGER, mandatory INTEGER,
                order_index INTEGER, needs_correction INTEGER);
             CREATE TABLE bidders (id INTEGER PRIMARY KEY, tender_id INTEGER, name TEXT, comment TEXT);
             CREATE TABLE bids (id INTEGER PRIMARY KEY, bidder_id INTEGER, lot_number TEXT,
                amount REAL, passed_phase_a INTEGER, delivery_term TEXT, warranty_months INTEGER);
             INSERT INTO tenders (id, title, process_number, schedule_json)
                VALUES (1, 'Bare', 'B-1', '{\"submission\": \"2023-11-02\"}');
             INSERT INTO lots (tender_id, number, name) VALUES (1, '1', 'Only lot');
             INSERT INTO lots (tender_id, number, name) VALUES (7, '1', 'Stray lot');",
        )
        .unwrap();

    let catalog = GraphLoader::new(&session).load_all().unwrap();
    assert_eq!(catalog.tenders.len(), 1);
    let tender = &catalog.tenders[0];
    assert_eq!(tender.lots.len(), 1);
    assert_eq!(tender.lots[0].name, "Only lot");
    assert!(tender.evaluations.is_empty());
    assert!(tender.disqualifications.is_empty());
    assert!(tender.lot_winners.is_empty());
    assert!(tender.our_companies.is_empty());
    assert_eq!(
        tender.schedule["submission"].date.as_deref(),
        Some("2023-11-02")
    );
    assert!(catalog.companies.is_empty());
    assert!(catalog.document_templates.is_empty());
}
