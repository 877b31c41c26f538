//! Consistency audit integration tests.
//!
//! Orphans are planted with foreign keys switched off, the way a database
//! written by an older release (or a crashed tool) ends up with them.

mod common;

use pretty_assertions::assert_eq;

use common::{count, memory_store, sample_tender};
use tenderstore_core::TenderStore;

fn without_foreign_keys(store: &TenderStore, sql: &str) {
    let conn = store.connection();
    conn.execute_batch("PRAGMA foreign_keys = OFF").unwrap();
    conn.execute_batch(sql).unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
}

#[test]
fn test_orphan_lot_is_reported_and_repaired() {
    let store = memory_store();
    let mut tender = sample_tender("LP-AUDIT");
    store.save(&mut tender).unwrap();

    without_foreign_keys(
        &store,
        "INSERT INTO lots (id, tender_id, number, name) VALUES (900, 4242, '1', 'Stray')",
    );

    let report = store.run_checks().unwrap();
    assert_eq!(report.orphans.get("lots"), Some(&vec![900]));
    assert_eq!(report.orphan_count(), 1);
    assert!(report.missing_indexes.is_empty());

    let outcome = store.auto_repair(&report);
    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(outcome.message, "deleted 1 orphan row(s)");

    let after = store.run_checks().unwrap();
    assert!(after.is_clean(), "{after}");
    // The real tender's lots are untouched
    assert_eq!(count(store.connection(), "SELECT COUNT(*) FROM lots"), 2);
}

#[test]
fn test_orphans_across_tables_and_missing_indexes() {
    let store = memory_store();
    let mut tender = sample_tender("LP-AUDIT-2");
    let id = store.save(&mut tender).unwrap();

    without_foreign_keys(
        &store,
        "INSERT INTO requested_documents (id, tender_id, name) VALUES (500, 777, 'Ghost document');
         INSERT INTO disqualifications (tender_id, document_id, reason) VALUES (1, 500, 'ghost');
         INSERT INTO bids (id, bidder_id, lot_number) VALUES (300, 999, '1');
         INSERT INTO tender_companies (tender_id, company_name) VALUES (888, 'Nobody');
         DROP INDEX idx_lots_tender;
         DROP INDEX idx_evaluations_tender;",
    );

    let report = store.run_checks().unwrap();
    assert_eq!(report.orphans["requested_documents"], vec![500]);
    assert_eq!(report.orphans["bids"], vec![300]);
    assert_eq!(report.orphans["tender_companies"].len(), 1);
    assert!(!report.orphans.contains_key("disqualifications"));
    let missing: Vec<_> = report.missing_indexes.iter().map(|i| i.name).collect();
    assert_eq!(missing, vec!["idx_lots_tender", "idx_evaluations_tender"]);

    let outcome = store.auto_repair(&report);
    assert!(outcome.ok, "{}", outcome.message);
    assert!(outcome.message.contains("deleted 3 orphan row(s)"));
    assert!(outcome.message.contains("created index idx_lots_tender"));

    assert!(store.run_checks().unwrap().is_clean());
    // The ghost document's disqualification went with it; the tender's own survived
    assert_eq!(
        count(store.connection(), "SELECT COUNT(*) FROM disqualifications"),
        1
    );
    assert!(store.load_tender(id).unwrap().is_some());
}

#[test]
fn test_failed_repair_changes_nothing() {
    let store = memory_store();
    let mut tender = sample_tender("LP-AUDIT-3");
    store.save(&mut tender).unwrap();
    without_foreign_keys(
        &store,
        "INSERT INTO lots (id, tender_id, number) VALUES (901, 5000, '9');
         DROP INDEX idx_bidders_tender;",
    );

    let mut report = store.run_checks().unwrap();
    // An index on a column that does not exist cannot be created
    report.missing_indexes[0].columns = &["no_such_column"];

    let outcome = store.auto_repair(&report);
    assert!(!outcome.ok);
    assert!(outcome.message.starts_with("repair failed"));
    assert_eq!(
        count(store.connection(), "SELECT COUNT(*) FROM lots WHERE id = 901"),
        1
    );
}
