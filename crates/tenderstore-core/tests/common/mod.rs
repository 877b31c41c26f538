//! Common test utilities for integration tests.
//!
//! Builders for realistic tender aggregates and small helpers for counting
//! rows, shared across integration test files.

#![allow(dead_code)]

use std::path::Path;

use rusqlite::Connection;
use serde_json::json;

use tenderstore_core::{
    Bid, Bidder, Correctability, Disqualification, Evaluation, Lot, Milestone, RequestedDocument,
    StoreOptions, TenderRecord, TenderState, TenderStore,
};

pub fn memory_store() -> TenderStore {
    TenderStore::open_in_memory(StoreOptions::default()).expect("Failed to open in-memory store")
}

pub fn file_store(path: &Path) -> TenderStore {
    TenderStore::open(path, StoreOptions::default()).expect("Failed to open store")
}

/// A tender with every nested collection populated
pub fn sample_tender(process_number: &str) -> TenderRecord {
    let mut tender = TenderRecord::new("Hospital cleaning services", process_number);
    tender.institution = "Ministry of Health".into();
    tender.state = TenderState::new("Under Evaluation");
    tender.technical_phase_passed = true;
    tender.created_on = chrono::NaiveDate::from_ymd_opt(2024, 1, 15);
    tender.our_companies.insert("Acme Services".into());
    tender.our_companies.insert("Brightway".into());

    tender
        .schedule
        .insert("submission".into(), Milestone::on("2024-03-01"));
    let mut opening = Milestone::on("2024-03-05");
    opening.time = Some("10:00".into());
    opening.extra.insert("room".into(), json!("B2"));
    tender.schedule.insert("opening".into(), opening);
    tender
        .evaluation_params
        .insert("price_weight".into(), json!(70));
    tender
        .evaluation_params
        .insert("criteria".into(), json!(["price", "experience"]));

    let mut north = Lot::new("1", "North wing");
    north.base_amount = 125_000.0;
    north.personal_budget_amount = 80_000.0;
    north.offered_amount = 119_500.5;
    north.phase_passed = true;
    north.assigned_company = Some("Acme Services".into());
    let mut south = Lot::new("2", "South wing");
    south.base_amount = 90_000.0;
    south.participating = false;
    tender.lots = vec![north, south];

    let mut insurance = RequestedDocument::new("D-1", "Insurance policy");
    insurance.category = "Legal".into();
    insurance.comment = "Original with apostille".into();
    insurance.submitted = true;
    insurance.correctable = Correctability::NotCorrectable;
    insurance.responsible = Some("Ana".into());
    insurance.mandatory = true;
    let mut references = RequestedDocument::new("D-2", "Client references");
    references.category = "Technical".into();
    references.file_path = Some("/dossiers/refs.pdf".into());
    references.order_index = 1;
    references.needs_correction = true;
    tender.documents = vec![insurance, references];

    let mut acme = Bidder::new("Acme Services");
    acme.bids.push(Bid {
        lot_number: "1".into(),
        amount: Some(119_500.5),
        passed_phase_a: true,
        delivery_term: Some("30 days".into()),
        warranty_months: Some(12),
        winner: false,
    });
    let mut rival = Bidder::new("Rival Cleaning Ltd");
    rival.comment = "Incumbent".into();
    rival.bids.push(Bid {
        lot_number: "1".into(),
        amount: Some(121_000.0),
        ..Default::default()
    });
    rival.bids.push(Bid {
        lot_number: "2".into(),
        amount: None,
        ..Default::default()
    });
    tender.bidders = vec![acme, rival, Bidder::new("Late Entrant")];

    tender.disqualifications.push(Disqualification {
        bidder_name: "Late Entrant".into(),
        document_id: None,
        document_code: Some("D-2".into()),
        reason: "References missing".into(),
    });
    tender.evaluations.push(Evaluation {
        bidder_name: "Rival Cleaning Ltd".into(),
        lot_number: Some("1".into()),
        criterion: "experience".into(),
        score: Some(8.5),
        passed: Some(true),
        comment: None,
    });

    tender.record_winner("1", "Acme Services");
    tender
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0))
        .unwrap_or_else(|e| panic!("query failed: {sql}: {e}"))
}
