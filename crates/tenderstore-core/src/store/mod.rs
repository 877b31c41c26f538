//! Tender Store Module
//!
//! The persistence engine behind the presentation layer:
//! - schema evolution of already-deployed databases
//! - full-graph load and atomic save of tender aggregates
//! - a full-text shadow index kept in sync by triggers
//! - structural auditing and repair
//!
//! # Architecture
//!
//! ```text
//! TenderStore
//! ├── Session (single connection, write scopes)
//! ├── SchemaManager (runs once on open)
//! ├── GraphLoader / GraphWriter (per aggregate)
//! ├── SearchIndex (tenders_fts, requested_documents_fts)
//! ├── ConsistencyAuditor (on demand)
//! └── Catalog / Settings (master lists, key/value pairs)
//! ```

pub mod audit;
pub mod catalog;
pub mod loader;
pub mod migrate;
pub mod schema;
pub mod search;
pub mod session;
pub mod settings;
pub mod writer;

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;
use crate::model::TenderRecord;

// Re-exports
pub use audit::{AuditReport, ConsistencyAuditor, RepairOutcome};
pub use catalog::{
    Catalog, Company, Competitor, DocumentTemplate, Institution, MasterRecord, Responsible,
};
pub use loader::{GraphLoader, LoadedCatalog};
pub use migrate::{MigrationReport, SchemaManager};
pub use schema::{IndexSpec, EXPECTED_INDEXES, SCHEMA_VERSION};
pub use search::{HitKind, RebuildOutcome, SearchHit, SearchIndex};
pub use session::{SearchOptions, Session, StoreOptions};
pub use settings::Settings;
pub use writer::GraphWriter;

/// A migrated tender database and the entry points over it
pub struct TenderStore {
    session: Session,
    options: StoreOptions,
    migration: MigrationReport,
}

impl TenderStore {
    /// Open (or create) the database at `path` and bring its schema current.
    ///
    /// A migration failure is fatal and surfaces as
    /// [`StoreError::SchemaMigration`](crate::StoreError::SchemaMigration).
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let session = Session::open(path, &options)?;
        let store = Self::initialize(session, options)?;
        info!(path = %path.display(), "tender store opened");
        Ok(store)
    }

    /// A migrated private in-memory store (for testing)
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let session = Session::in_memory(&options)?;
        Self::initialize(session, options)
    }

    fn initialize(session: Session, options: StoreOptions) -> Result<Self> {
        let migration = SchemaManager::new(&session).initialize()?;
        Ok(Self {
            session,
            options,
            migration,
        })
    }

    /// What the startup migration changed
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The underlying connection, for callers that need raw access
    pub fn connection(&self) -> &Connection {
        self.session.conn()
    }

    /// Every tender aggregate plus the five master lists.
    pub fn load_all(&self) -> Result<LoadedCatalog> {
        GraphLoader::new(&self.session).load_all()
    }

    pub fn load_tenders(&self) -> Result<Vec<TenderRecord>> {
        GraphLoader::new(&self.session).load_tenders(None)
    }

    /// Reload one aggregate, e.g. after a concurrency conflict.
    pub fn load_tender(&self, id: i64) -> Result<Option<TenderRecord>> {
        GraphLoader::new(&self.session).load_tender(id)
    }

    /// Save one aggregate atomically and return its id.
    ///
    /// Fails with [`StoreError::Concurrency`](crate::StoreError::Concurrency)
    /// when `tender.updated_at` is stale.
    pub fn save(&self, tender: &mut TenderRecord) -> Result<i64> {
        GraphWriter::new(&self.session).save(tender)
    }

    pub fn delete_tender(&self, id: i64) -> Result<bool> {
        GraphWriter::new(&self.session).delete(id)
    }

    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        SearchIndex::new(&self.session).search(term, &self.options.search)
    }

    pub fn search_with(&self, term: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        SearchIndex::new(&self.session).search(term, options)
    }

    pub fn rebuild_search_index(&self) -> RebuildOutcome {
        SearchIndex::new(&self.session).rebuild()
    }

    pub fn run_checks(&self) -> Result<AuditReport> {
        ConsistencyAuditor::new(&self.session).run_checks()
    }

    pub fn auto_repair(&self, report: &AuditReport) -> RepairOutcome {
        ConsistencyAuditor::new(&self.session).auto_repair(report)
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.session)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Settings::new(&self.session).get(key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        Settings::new(&self.session).set(key, value)
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        Settings::new(&self.session).delete(key)
    }

    pub fn settings(&self) -> Result<Vec<(String, String)>> {
        Settings::new(&self.session).list()
    }
}
