//! Graph Writer
//!
//! Persists one tender aggregate inside a single write scope. The stored
//! `updated_at` is compared with the caller's token before anything is
//! touched, so a stale save fails with [`StoreError::Concurrency`] and leaves
//! the database unchanged.
//!
//! Lots, bidders (with bids), company links, disqualifications, evaluations and
//! lot winners are replaced wholesale. Requested documents are reconciled by id
//! because dossier records elsewhere point at document ids.
//!
//! After commit the aggregate is brought to the shape a reload would give:
//! disqualifications carry the id and code of the document they resolved to,
//! and winners named only on lots are added to `lot_winners`.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use tracing::{debug, info};

use super::loader::row_to_document;
use super::schema::DOCUMENT_COLUMNS;
use super::session::{fresh_timestamp, has_column, Session};
use crate::error::{Result, StoreError};
use crate::model::{names_match, LotWinner, RequestedDocument, TenderRecord};

/// Ids and token produced by a save, applied to the aggregate only after commit
#[derive(Debug, Default)]
struct Staged {
    tender_id: i64,
    updated_at: String,
    /// (index into `documents`, new row id)
    document_ids: Vec<(usize, i64)>,
    /// (index into `disqualifications`, resolved document id and its code)
    disqualification_documents: Vec<(usize, Option<(i64, String)>)>,
    /// Lot winners recorded from `Lot::winner_name` alone
    lot_field_winners: Vec<LotWinner>,
}

pub struct GraphWriter<'a> {
    session: &'a Session,
}

impl<'a> GraphWriter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn conn(&self) -> &Connection {
        self.session.conn()
    }

    /// Save `tender` and return its id.
    ///
    /// On success the aggregate carries its id, the fresh `updated_at` token
    /// and the ids of newly inserted documents. On failure it is untouched.
    pub fn save(&self, tender: &mut TenderRecord) -> Result<i64> {
        if tender.process_number.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "tender needs a process number".to_string(),
            ));
        }

        let scope = self.session.write_scope("save_tender")?;
        let staged = self.write_graph(tender)?;
        scope.commit()?;

        tender.id = Some(staged.tender_id);
        tender.updated_at = Some(staged.updated_at);
        for (index, id) in staged.document_ids {
            tender.documents[index].id = Some(id);
        }
        for (index, document) in staged.disqualification_documents {
            let disqualification = &mut tender.disqualifications[index];
            let (id, code) = document.unzip();
            disqualification.document_id = id;
            disqualification.document_code = code;
        }
        tender.lot_winners.extend(staged.lot_field_winners);
        tender.stamp_winners();

        info!(tender_id = staged.tender_id, "tender saved");
        Ok(staged.tender_id)
    }

    fn write_graph(&self, tender: &TenderRecord) -> Result<Staged> {
        if let Some(id) = tender.id {
            self.check_revision(id, tender.updated_at.as_deref())?;
        }

        let mut staged = Staged {
            updated_at: fresh_timestamp(),
            ..Default::default()
        };
        staged.tender_id = self.write_header(tender, &staged.updated_at)?;
        let tender_id = staged.tender_id;

        self.replace_company_links(tender_id, tender)?;
        self.replace_lots(tender_id, tender)?;

        staged.document_ids = self.reconcile_documents(tender_id, &tender.documents)?;
        let saved_documents = saved_document_ids(&tender.documents, &staged.document_ids);

        staged.disqualification_documents =
            self.replace_disqualifications(tender_id, tender, &saved_documents)?;
        self.replace_evaluations(tender_id, tender)?;
        self.replace_bidders(tender_id, tender)?;
        staged.lot_field_winners = tender.unrecorded_lot_winners();
        self.replace_lot_winners(tender_id, &tender.lot_winners, &staged.lot_field_winners)?;

        Ok(staged)
    }

    /// Fail when the stored token differs from the caller's (or the row is gone).
    fn check_revision(&self, id: i64, expected: Option<&str>) -> Result<()> {
        let stored: Option<Option<String>> = self
            .conn()
            .query_row("SELECT updated_at FROM tenders WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        let conflict = match &stored {
            None => true,
            Some(found) => expected.is_some() && expected != found.as_deref(),
        };
        if conflict {
            return Err(StoreError::Concurrency {
                tender_id: id,
                expected: expected.map(str::to_string),
                found: stored.flatten(),
            });
        }
        Ok(())
    }

    fn write_header(&self, tender: &TenderRecord, updated_at: &str) -> Result<i64> {
        let schedule = serde_json::to_string(&tender.schedule)?;
        let evaluation = serde_json::to_string(&tender.evaluation_params)?;
        let created_on = tender
            .created_on
            .map(|d| d.format("%Y-%m-%d").to_string());
        let process_number = tender.process_number.trim();
        let state = tender.state.as_str();
        let values: Vec<&dyn ToSql> = vec![
            &tender.title,
            &process_number,
            &tender.institution,
            &state,
            &tender.technical_phase_passed,
            &tender.economic_phase_passed,
            &tender.awarded,
            &tender.awardee,
            &tender.disqualification_reason,
            &created_on,
            &schedule,
            &evaluation,
            &updated_at,
        ];

        let conn = self.conn();
        let id = match tender.id {
            Some(id) => {
                let mut update = values.clone();
                update.push(&id);
                conn.execute(
                    "UPDATE tenders SET title = ?1, process_number = ?2, institution = ?3,
                        state = ?4, technical_phase_passed = ?5, economic_phase_passed = ?6,
                        awarded = ?7, awardee = ?8, disqualification_reason = ?9,
                        created_on = ?10, schedule_json = ?11, evaluation_json = ?12,
                        updated_at = ?13
                     WHERE id = ?14",
                    update.as_slice(),
                )?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO tenders (title, process_number, institution, state,
                        technical_phase_passed, economic_phase_passed, awarded, awardee,
                        disqualification_reason, created_on, schedule_json, evaluation_json,
                        updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    values.as_slice(),
                )?;
                conn.last_insert_rowid()
            }
        };

        // The single-company column only serves as a load fallback for old rows
        if has_column(conn, "tenders", "company")? {
            conn.execute("UPDATE tenders SET company = NULL WHERE id = ?1", [id])?;
        }
        debug!(tender_id = id, "header written");
        Ok(id)
    }

    fn replace_company_links(&self, tender_id: i64, tender: &TenderRecord) -> Result<()> {
        let conn = self.conn();
        let companies = tender.normalized_companies();
        conn.execute("DELETE FROM tender_companies WHERE tender_id = ?1", [tender_id])?;

        let mut ensure = conn.prepare_cached("INSERT OR IGNORE INTO companies (name) VALUES (?1)")?;
        let mut link = conn.prepare_cached(
            "INSERT OR IGNORE INTO tender_companies (tender_id, company_name) VALUES (?1, ?2)",
        )?;
        for company in &companies {
            ensure.execute([company])?;
            link.execute(params![tender_id, company])?;
        }
        debug!(tender_id, count = companies.len(), "company links replaced");
        Ok(())
    }

    fn replace_lots(&self, tender_id: i64, tender: &TenderRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM lots WHERE tender_id = ?1", [tender_id])?;
        let mut insert = conn.prepare_cached(
            "INSERT INTO lots (tender_id, number, name, base_amount, personal_budget_amount,
                offered_amount, participating, phase_passed, assigned_company)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for lot in &tender.lots {
            insert.execute(params![
                tender_id,
                lot.number.trim(),
                lot.name,
                lot.base_amount,
                lot.personal_budget_amount,
                lot.offered_amount,
                lot.participating,
                lot.phase_passed,
                lot.assigned_company,
            ])?;
        }
        Ok(())
    }

    /// Delete removed documents, update changed ones, insert new ones.
    /// Returns `(index, id)` for every inserted document.
    fn reconcile_documents(
        &self,
        tender_id: i64,
        documents: &[RequestedDocument],
    ) -> Result<Vec<(usize, i64)>> {
        let conn = self.conn();
        let stored: HashMap<i64, RequestedDocument> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM requested_documents WHERE tender_id = ?1"
            ))?;
            let rows = stmt
                .query_map([tender_id], row_to_document)?
                .map(|row| row.map(|(_, doc)| (doc.id.unwrap_or_default(), doc)))
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            rows
        };

        // An id claimed twice, or one this tender never stored, is a new document
        let mut kept = HashSet::new();
        let mut plan = Vec::with_capacity(documents.len());
        for document in documents {
            let existing = document
                .id
                .filter(|id| stored.contains_key(id) && kept.insert(*id));
            plan.push(existing);
        }

        let mut removed = 0;
        for id in stored.keys().filter(|id| !kept.contains(*id)) {
            conn.execute("DELETE FROM disqualifications WHERE document_id = ?1", [id])?;
            conn.execute("DELETE FROM requested_documents WHERE id = ?1", [id])?;
            removed += 1;
        }

        let mut updated = 0;
        let mut inserted = Vec::new();
        for (index, (document, existing)) in documents.iter().zip(plan).enumerate() {
            match existing {
                Some(id) => {
                    if stored.get(&id) != Some(document) {
                        self.update_document(id, document)?;
                        updated += 1;
                    }
                }
                None => {
                    let id = self.insert_document(tender_id, document)?;
                    inserted.push((index, id));
                }
            }
        }

        debug!(
            tender_id,
            removed,
            updated,
            inserted = inserted.len(),
            "documents reconciled"
        );
        Ok(inserted)
    }

    fn insert_document(&self, tender_id: i64, document: &RequestedDocument) -> Result<i64> {
        let conn = self.conn();
        conn.prepare_cached(
            "INSERT INTO requested_documents (tender_id, code, name, category, comment,
                submitted, correctable, file_path, responsible, reviewed, mandatory,
                order_index, needs_correction)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?
        .execute(params![
            tender_id,
            document.code,
            document.name,
            document.category,
            document.comment,
            document.submitted,
            document.correctable.as_str(),
            document.file_path,
            document.responsible,
            document.reviewed,
            document.mandatory,
            document.order_index,
            document.needs_correction,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    fn update_document(&self, id: i64, document: &RequestedDocument) -> Result<()> {
        self.conn()
            .prepare_cached(
                "UPDATE requested_documents SET code = ?2, name = ?3, category = ?4,
                    comment = ?5, submitted = ?6, correctable = ?7, file_path = ?8,
                    responsible = ?9, reviewed = ?10, mandatory = ?11, order_index = ?12,
                    needs_correction = ?13
                 WHERE id = ?1",
            )?
            .execute(params![
                id,
                document.code,
                document.name,
                document.category,
                document.comment,
                document.submitted,
                document.correctable.as_str(),
                document.file_path,
                document.responsible,
                document.reviewed,
                document.mandatory,
                document.order_index,
                document.needs_correction,
            ])?;
        Ok(())
    }

    /// Returns the document (id, code) stored for each disqualification, by index.
    fn replace_disqualifications(
        &self,
        tender_id: i64,
        tender: &TenderRecord,
        saved_documents: &[(String, i64)],
    ) -> Result<Vec<(usize, Option<(i64, String)>)>> {
        let conn = self.conn();
        conn.execute("DELETE FROM disqualifications WHERE tender_id = ?1", [tender_id])?;
        let mut insert = conn.prepare_cached(
            "INSERT INTO disqualifications (tender_id, document_id, bidder_name, reason)
             VALUES (?1, ?2, ?3, ?4)",
        )?;

        let mut resolved = Vec::with_capacity(tender.disqualifications.len());
        for (index, disqualification) in tender.disqualifications.iter().enumerate() {
            let by_id = disqualification
                .document_id
                .and_then(|id| saved_documents.iter().find(|(_, saved)| *saved == id));
            let by_code = || {
                let code = disqualification.document_code.as_deref()?;
                saved_documents
                    .iter()
                    .find(|(saved, _)| names_match(saved, code))
            };
            let document = by_id.or_else(by_code);

            insert.execute(params![
                tender_id,
                document.map(|(_, id)| *id),
                disqualification.bidder_name.trim(),
                disqualification.reason,
            ])?;
            resolved.push((index, document.map(|(code, id)| (*id, code.clone()))));
        }
        Ok(resolved)
    }

    fn replace_evaluations(&self, tender_id: i64, tender: &TenderRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM evaluations WHERE tender_id = ?1", [tender_id])?;
        let mut insert = conn.prepare_cached(
            "INSERT INTO evaluations (tender_id, bidder_name, lot_number, criterion, score,
                passed, comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for evaluation in &tender.evaluations {
            insert.execute(params![
                tender_id,
                evaluation.bidder_name.trim(),
                evaluation.lot_number,
                evaluation.criterion,
                evaluation.score,
                evaluation.passed,
                evaluation.comment,
            ])?;
        }
        Ok(())
    }

    fn replace_bidders(&self, tender_id: i64, tender: &TenderRecord) -> Result<()> {
        let conn = self.conn();
        // Bids go first for databases whose foreign keys never cascaded
        conn.execute(
            "DELETE FROM bids WHERE bidder_id IN (SELECT id FROM bidders WHERE tender_id = ?1)",
            [tender_id],
        )?;
        conn.execute("DELETE FROM bidders WHERE tender_id = ?1", [tender_id])?;

        let mut insert_bidder =
            conn.prepare_cached("INSERT INTO bidders (tender_id, name, comment) VALUES (?1, ?2, ?3)")?;
        let mut insert_bid = conn.prepare_cached(
            "INSERT INTO bids (bidder_id, lot_number, amount, passed_phase_a, delivery_term,
                warranty_months)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut bids = 0;
        for bidder in &tender.bidders {
            insert_bidder.execute(params![tender_id, bidder.name.trim(), bidder.comment])?;
            let bidder_id = conn.last_insert_rowid();
            for bid in bidder.bids.iter().filter(|b| !b.lot_number.trim().is_empty()) {
                insert_bid.execute(params![
                    bidder_id,
                    bid.lot_number.trim(),
                    bid.amount,
                    bid.passed_phase_a,
                    bid.delivery_term,
                    bid.warranty_months,
                ])?;
                bids += 1;
            }
        }
        debug!(tender_id, bidders = tender.bidders.len(), bids, "bidders replaced");
        Ok(())
    }

    fn replace_lot_winners(
        &self,
        tender_id: i64,
        recorded: &[LotWinner],
        from_lots: &[LotWinner],
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM lot_winners WHERE tender_id = ?1", [tender_id])?;
        let mut insert = conn.prepare_cached(
            "INSERT OR IGNORE INTO lot_winners (tender_id, lot_number, winner_name, company_name)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for winner in recorded.iter().chain(from_lots) {
            if winner.winner_name.trim().is_empty() {
                continue;
            }
            insert.execute(params![
                tender_id,
                winner.lot_number.trim(),
                winner.winner_name.trim(),
                winner.company_name,
            ])?;
        }
        Ok(())
    }

    /// Delete a tender and everything it owns. `false` when no such tender.
    pub fn delete(&self, tender_id: i64) -> Result<bool> {
        let scope = self.session.write_scope("delete_tender")?;
        let conn = self.conn();
        // Children are removed explicitly so databases without enforced
        // foreign keys end up just as clean
        conn.execute(
            "DELETE FROM bids WHERE bidder_id IN (SELECT id FROM bidders WHERE tender_id = ?1)",
            [tender_id],
        )?;
        for table in [
            "disqualifications",
            "evaluations",
            "requested_documents",
            "lots",
            "bidders",
            "tender_companies",
            "lot_winners",
        ] {
            conn.execute(&format!("DELETE FROM {table} WHERE tender_id = ?1"), [tender_id])?;
        }
        let deleted = conn.execute("DELETE FROM tenders WHERE id = ?1", [tender_id])? > 0;
        scope.commit()?;

        if deleted {
            info!(tender_id, "tender deleted");
        }
        Ok(deleted)
    }
}

/// `(code, id)` of every document as it will be stored after this save.
fn saved_document_ids(
    documents: &[RequestedDocument],
    inserted: &[(usize, i64)],
) -> Vec<(String, i64)> {
    let inserted: HashMap<usize, i64> = inserted.iter().copied().collect();
    documents
        .iter()
        .enumerate()
        .filter_map(|(index, doc)| {
            let id = inserted.get(&index).copied().or(doc.id)?;
            Some((doc.code.clone(), id))
        })
        .collect()
}
