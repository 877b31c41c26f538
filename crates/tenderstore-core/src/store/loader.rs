//! Graph Loader
//!
//! Rebuilds tender aggregates from the normalized tables with one query per
//! table, never one per row. Child rows are grouped onto their tender through
//! an id index; rows whose tender is unknown are skipped. Optional tables that
//! an older database may lack read as empty.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::{debug, warn};

use super::catalog::{Catalog, Company, Competitor, DocumentTemplate, Institution, Responsible};
use super::schema::{DOCUMENT_COLUMNS, LOT_COLUMNS, TENDER_COLUMNS};
use super::session::{has_column, table_exists, Session};
use crate::error::Result;
use crate::model::{
    compare_lot_numbers, schedule_from_json, Bid, Bidder, Correctability, Disqualification,
    Evaluation, Lot, LotWinner, RequestedDocument, TenderRecord, TenderState,
};

/// Everything the presentation layer needs at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadedCatalog {
    pub tenders: Vec<TenderRecord>,
    pub companies: Vec<Company>,
    pub institutions: Vec<Institution>,
    pub document_templates: Vec<DocumentTemplate>,
    pub competitors: Vec<Competitor>,
    pub responsibles: Vec<Responsible>,
}

pub struct GraphLoader<'a> {
    session: &'a Session,
}

impl<'a> GraphLoader<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn conn(&self) -> &Connection {
        self.session.conn()
    }

    /// Load every tender aggregate plus the five master lists.
    pub fn load_all(&self) -> Result<LoadedCatalog> {
        let tenders = self.load_tenders(None)?;
        let catalog = Catalog::new(self.session);
        Ok(LoadedCatalog {
            tenders,
            companies: catalog.list()?,
            institutions: catalog.list()?,
            document_templates: catalog.list()?,
            competitors: catalog.list()?,
            responsibles: catalog.list()?,
        })
    }

    /// Load a single tender aggregate.
    pub fn load_tender(&self, id: i64) -> Result<Option<TenderRecord>> {
        Ok(self.load_tenders(Some(id))?.into_iter().next())
    }

    /// Load all tenders, or just `only`, ordered by id.
    pub fn load_tenders(&self, only: Option<i64>) -> Result<Vec<TenderRecord>> {
        let (mut tenders, legacy_company) = self.load_headers(only)?;
        if tenders.is_empty() {
            return Ok(Vec::new());
        }

        self.load_company_links(only, &mut tenders, &legacy_company)?;
        self.load_lots(only, &mut tenders)?;
        self.load_documents(only, &mut tenders)?;
        self.load_evaluations(only, &mut tenders)?;
        self.load_disqualifications(only, &mut tenders)?;
        self.load_bidders(only, &mut tenders)?;
        self.load_lot_winners(only, &mut tenders)?;

        let mut out: Vec<TenderRecord> = tenders.into_values().collect();
        for tender in &mut out {
            tender.stamp_winners();
        }
        debug!(count = out.len(), "tender aggregates loaded");
        Ok(out)
    }

    fn optional_table(&self, table: &str) -> Result<bool> {
        let exists = table_exists(self.conn(), table)?;
        if !exists {
            debug!(table, "optional table missing, treating as empty");
        }
        Ok(exists)
    }

    /// Step 1: headers indexed by id, plus the legacy single-company column.
    fn load_headers(
        &self,
        only: Option<i64>,
    ) -> Result<(BTreeMap<i64, TenderRecord>, HashMap<i64, String>)> {
        let legacy_column = has_column(self.conn(), "tenders", "company")?;
        let legacy_expr = if legacy_column { "company" } else { "NULL" };
        let sql = format!(
            "SELECT {TENDER_COLUMNS}, {legacy_expr} FROM tenders
             WHERE (?1 IS NULL OR id = ?1) ORDER BY id"
        );

        let mut tenders = BTreeMap::new();
        let mut legacy = HashMap::new();
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let tender = row_to_tender(row)?;
            let id = tender.id.unwrap_or_default();
            if let Some(company) = row.get::<_, Option<String>>(14)? {
                let company = company.trim();
                if !company.is_empty() {
                    legacy.insert(id, company.to_string());
                }
            }
            tenders.insert(id, tender);
        }
        Ok((tenders, legacy))
    }

    /// Step 2: our companies, falling back to the legacy column.
    fn load_company_links(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
        legacy_company: &HashMap<i64, String>,
    ) -> Result<()> {
        if self.optional_table("tender_companies")? {
            let mut stmt = self.conn().prepare(
                "SELECT tender_id, company_name FROM tender_companies
                 WHERE (?1 IS NULL OR tender_id = ?1)",
            )?;
            let mut rows = stmt.query([only])?;
            while let Some(row) = rows.next()? {
                let tender_id: i64 = row.get(0)?;
                let name: Option<String> = row.get(1)?;
                if let (Some(tender), Some(name)) = (tenders.get_mut(&tender_id), name) {
                    let name = name.trim();
                    if !name.is_empty() {
                        tender.our_companies.insert(name.to_string());
                    }
                }
            }
        }

        for (id, tender) in tenders.iter_mut() {
            if tender.our_companies.is_empty() {
                if let Some(company) = legacy_company.get(id) {
                    tender.our_companies.insert(company.clone());
                }
            }
        }
        Ok(())
    }

    /// Step 3: lots, numeric-aware order within each tender.
    fn load_lots(&self, only: Option<i64>, tenders: &mut BTreeMap<i64, TenderRecord>) -> Result<()> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LOT_COLUMNS} FROM lots WHERE (?1 IS NULL OR tender_id = ?1) ORDER BY tender_id, id"
        ))?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let tender_id: i64 = row.get(0)?;
            if let Some(tender) = tenders.get_mut(&tender_id) {
                tender.lots.push(row_to_lot(row)?);
            }
        }
        for tender in tenders.values_mut() {
            tender
                .lots
                .sort_by(|a, b| compare_lot_numbers(&a.number, &b.number));
        }
        Ok(())
    }

    /// Step 4a: requested documents.
    fn load_documents(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
    ) -> Result<()> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM requested_documents
             WHERE (?1 IS NULL OR tender_id = ?1) ORDER BY tender_id, order_index, id"
        ))?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let (tender_id, document) = row_to_document(row)?;
            if let Some(tender) = tenders.get_mut(&tender_id) {
                tender.documents.push(document);
            }
        }
        Ok(())
    }

    /// Step 4b: evaluation rows.
    fn load_evaluations(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
    ) -> Result<()> {
        if !self.optional_table("evaluations")? {
            return Ok(());
        }
        let mut stmt = self.conn().prepare(
            "SELECT tender_id, bidder_name, lot_number, criterion, score, passed, comment
             FROM evaluations WHERE (?1 IS NULL OR tender_id = ?1) ORDER BY tender_id, id",
        )?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let tender_id: i64 = row.get(0)?;
            if let Some(tender) = tenders.get_mut(&tender_id) {
                let passed = match row.get_ref(5)? {
                    ValueRef::Null => None,
                    value => Some(coerce_bool(value)),
                };
                tender.evaluations.push(Evaluation {
                    bidder_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    lot_number: row.get(2)?,
                    criterion: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    score: coerce_opt_f64(row.get_ref(4)?),
                    passed,
                    comment: row.get(6)?,
                });
            }
        }
        Ok(())
    }

    /// Step 4c: disqualification rows, with the document code for reference.
    fn load_disqualifications(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
    ) -> Result<()> {
        if !self.optional_table("disqualifications")? {
            return Ok(());
        }
        let mut stmt = self.conn().prepare(
            "SELECT q.tender_id, q.bidder_name, q.document_id, d.code, q.reason
             FROM disqualifications q
             LEFT JOIN requested_documents d ON d.id = q.document_id
             WHERE (?1 IS NULL OR q.tender_id = ?1) ORDER BY q.tender_id, q.id",
        )?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let tender_id: i64 = row.get(0)?;
            if let Some(tender) = tenders.get_mut(&tender_id) {
                tender.disqualifications.push(Disqualification {
                    bidder_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    document_id: row.get(2)?,
                    document_code: row.get(3)?,
                    reason: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// Step 5: bidders joined with their bids, each bidder built once.
    fn load_bidders(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
    ) -> Result<()> {
        let mut stmt = self.conn().prepare(
            "SELECT b.id, b.tender_id, b.name, b.comment,
                    x.lot_number, x.amount, x.passed_phase_a, x.delivery_term, x.warranty_months
             FROM bidders b
             LEFT JOIN bids x ON x.bidder_id = b.id
             WHERE (?1 IS NULL OR b.tender_id = ?1)
             ORDER BY b.tender_id, b.id, x.id",
        )?;
        // bidder id -> position in its tender's bidder list
        let mut built: HashMap<i64, usize> = HashMap::new();
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let bidder_id: i64 = row.get(0)?;
            let tender_id: i64 = row.get(1)?;
            let Some(tender) = tenders.get_mut(&tender_id) else {
                continue;
            };

            let position = *built.entry(bidder_id).or_insert_with(|| {
                tender.bidders.push(Bidder::default());
                tender.bidders.len() - 1
            });
            let bidder = &mut tender.bidders[position];
            if bidder.name.is_empty() {
                bidder.name = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                bidder.comment = row.get::<_, Option<String>>(3)?.unwrap_or_default();
            }

            if let Some(lot_number) = row.get::<_, Option<String>>(4)? {
                bidder.bids.push(Bid {
                    lot_number,
                    amount: coerce_opt_f64(row.get_ref(5)?),
                    passed_phase_a: coerce_bool(row.get_ref(6)?),
                    delivery_term: row.get(7)?,
                    warranty_months: row.get(8)?,
                    winner: false,
                });
            }
        }
        Ok(())
    }

    /// Step 6: recorded lot winners, current or legacy layout.
    fn load_lot_winners(
        &self,
        only: Option<i64>,
        tenders: &mut BTreeMap<i64, TenderRecord>,
    ) -> Result<()> {
        if !self.optional_table("lot_winners")? {
            return Ok(());
        }
        let company_expr = if has_column(self.conn(), "lot_winners", "company_name")? {
            "company_name"
        } else {
            "NULL"
        };
        let ours_expr = if has_column(self.conn(), "lot_winners", "is_ours")? {
            "is_ours"
        } else {
            "0"
        };
        let mut stmt = self.conn().prepare(&format!(
            "SELECT tender_id, lot_number, winner_name, {company_expr}, {ours_expr}
             FROM lot_winners WHERE (?1 IS NULL OR tender_id = ?1) ORDER BY tender_id, rowid"
        ))?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            let tender_id: i64 = row.get(0)?;
            let Some(tender) = tenders.get_mut(&tender_id) else {
                continue;
            };
            let lot_number: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
            let winner_name: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            let mut company_name: Option<String> = row.get(3)?;
            if company_name.is_none() && coerce_bool(row.get_ref(4)?) {
                // Legacy rows only flag the win as ours
                company_name = tender
                    .lot(&lot_number)
                    .and_then(|l| l.assigned_company.clone())
                    .filter(|c| !c.trim().is_empty())
                    .or_else(|| Some(winner_name.clone()));
            }
            tender.lot_winners.push(LotWinner {
                lot_number,
                winner_name,
                company_name,
            });
        }
        Ok(())
    }
}

fn row_to_tender(row: &Row<'_>) -> rusqlite::Result<TenderRecord> {
    let created_on = row
        .get::<_, Option<String>>(10)?
        .and_then(|text| parse_date(&text));
    let schedule = row
        .get::<_, Option<String>>(11)?
        .filter(|s| !s.trim().is_empty())
        .map(|s| schedule_from_json(&s))
        .unwrap_or_default();
    let evaluation_params = row
        .get::<_, Option<String>>(12)?
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| match serde_json::from_str(&s) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!(error = %e, "unreadable evaluation parameters, using none");
                None
            }
        })
        .unwrap_or_default();

    Ok(TenderRecord {
        id: Some(row.get(0)?),
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        process_number: row.get(2)?,
        institution: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        state: TenderState::new(row.get::<_, Option<String>>(4)?.unwrap_or_default()),
        technical_phase_passed: coerce_bool(row.get_ref(5)?),
        economic_phase_passed: coerce_bool(row.get_ref(6)?),
        awarded: coerce_bool(row.get_ref(7)?),
        awardee: row.get(8)?,
        disqualification_reason: row.get(9)?,
        created_on,
        schedule,
        evaluation_params,
        updated_at: row.get(13)?,
        ..Default::default()
    })
}

fn row_to_lot(row: &Row<'_>) -> rusqlite::Result<Lot> {
    Ok(Lot {
        number: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        base_amount: coerce_f64(row.get_ref(3)?),
        personal_budget_amount: coerce_f64(row.get_ref(4)?),
        offered_amount: coerce_f64(row.get_ref(5)?),
        participating: coerce_bool(row.get_ref(6)?),
        phase_passed: coerce_bool(row.get_ref(7)?),
        assigned_company: row.get(8)?,
        winner_name: String::new(),
        won_by_us: false,
    })
}

/// Map a [`DOCUMENT_COLUMNS`] row to `(tender id, document)`.
pub(crate) fn row_to_document(row: &Row<'_>) -> rusqlite::Result<(i64, RequestedDocument)> {
    let correctable: Option<String> = row.get(7)?;
    let document = RequestedDocument {
        id: Some(row.get(0)?),
        code: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        category: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        comment: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        submitted: coerce_bool(row.get_ref(6)?),
        correctable: Correctability::from_stored(correctable.as_deref()),
        file_path: row.get(8)?,
        responsible: row.get(9)?,
        reviewed: coerce_bool(row.get_ref(10)?),
        mandatory: coerce_bool(row.get_ref(11)?),
        order_index: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        needs_correction: coerce_bool(row.get_ref(13)?),
    };
    Ok((row.get(1)?, document))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let parsed = NaiveDate::parse_from_str(text.get(..10).unwrap_or(text), "%Y-%m-%d").ok();
    if parsed.is_none() && !text.is_empty() {
        debug!(value = text, "ignoring unparsable date");
    }
    parsed
}

/// Amounts may have been stored as text by older versions.
fn coerce_opt_f64(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            let text = text.trim();
            text.parse::<f64>()
                .or_else(|_| text.replace(',', "").parse::<f64>())
                .ok()
        }
        ValueRef::Blob(_) => None,
    }
}

fn coerce_f64(value: ValueRef<'_>) -> f64 {
    coerce_opt_f64(value).unwrap_or(0.0)
}

fn coerce_bool(value: ValueRef<'_>) -> bool {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => false,
        ValueRef::Integer(i) => i != 0,
        ValueRef::Real(f) => f != 0.0,
        ValueRef::Text(bytes) => matches!(
            String::from_utf8_lossy(bytes).trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_amounts() {
        assert_eq!(coerce_f64(ValueRef::Integer(3)), 3.0);
        assert_eq!(coerce_f64(ValueRef::Text(b" 1,250.5 ")), 1250.5);
        assert_eq!(coerce_f64(ValueRef::Text(b"n/a")), 0.0);
        assert_eq!(coerce_opt_f64(ValueRef::Null), None);
    }

    #[test]
    fn test_coerce_flags() {
        assert!(coerce_bool(ValueRef::Integer(1)));
        assert!(coerce_bool(ValueRef::Text(b"True")));
        assert!(!coerce_bool(ValueRef::Text(b"0")));
        assert!(!coerce_bool(ValueRef::Null));
    }

    #[test]
    fn test_parse_date_accepts_datetime_prefix() {
        assert_eq!(
            parse_date("2024-02-29 13:00:00"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_date("29/02/2024"), None);
    }
}
