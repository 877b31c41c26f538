//! TenderStore Core - persistence engine for procurement tender tracking
//!
//! This crate provides:
//! - The typed tender aggregate (lots, documents, bidders, winners, ...)
//! - SQLite schema evolution for already-deployed databases
//! - Bounded-query loading and atomic, optimistically locked saving
//! - An FTS5 search index kept in sync with the base tables
//! - Orphan and index auditing with automatic repair

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};

pub use model::{
    compare_lot_numbers, names_match, Bid, Bidder, Correctability, Disqualification, Evaluation,
    Lot, LotWinner, Milestone, RequestedDocument, Schedule, TenderRecord, TenderState,
    KNOWN_STATES,
};

pub use store::{
    AuditReport, Catalog, Company, Competitor, DocumentTemplate, HitKind, IndexSpec, Institution,
    LoadedCatalog, MasterRecord, MigrationReport, RebuildOutcome, RepairOutcome, Responsible,
    SearchHit, SearchOptions, StoreOptions, TenderStore,
};
