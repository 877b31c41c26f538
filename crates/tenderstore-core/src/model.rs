//! Tender aggregate and its nested entities
//!
//! A [`TenderRecord`] is the unit of loading and saving. Everything it owns
//! (lots, requested documents, bidders with their bids, disqualifications,
//! evaluations, recorded lot winners and the set of our companies) is read and
//! written together by the store.
//!
//! Lot `winner_name` / `won_by_us` and bid `winner` are derived from
//! [`TenderRecord::lot_winners`]; call [`TenderRecord::stamp_winners`] after
//! changing the recorded winners. A lot `winner_name` set directly that has no
//! recorded winner behind it is recorded on save (see
//! [`TenderRecord::unrecorded_lot_winners`]).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Tender states the presentation layer offers. Stored text outside this
/// list is kept as-is.
pub const KNOWN_STATES: &[&str] = &[
    "Draft",
    "In Preparation",
    "Submitted",
    "Under Evaluation",
    "Awarded",
    "Lost",
    "Disqualified",
    "Cancelled",
    "Void",
];

/// Tender state: open text with a recognised-values allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenderState(String);

impl TenderState {
    pub fn new(state: impl Into<String>) -> Self {
        Self(state.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the state is one of [`KNOWN_STATES`] (case-insensitive).
    pub fn is_recognized(&self) -> bool {
        KNOWN_STATES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(self.0.trim()))
    }
}

impl Default for TenderState {
    fn default() -> Self {
        Self(KNOWN_STATES[0].to_string())
    }
}

impl fmt::Display for TenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a missing or defective document can be remedied after the deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctability {
    #[default]
    Correctable,
    NotCorrectable,
}

impl Correctability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Correctability::Correctable => "correctable",
            Correctability::NotCorrectable => "not_correctable",
        }
    }

    /// Parse stored text. Unknown values fall back to `Correctable`.
    pub fn from_stored(text: Option<&str>) -> Self {
        let Some(raw) = text else {
            return Self::default();
        };
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "" | "correctable" | "yes" | "true" | "1" => Correctability::Correctable,
            "not_correctable" | "notcorrectable" | "no" | "false" | "0" => {
                Correctability::NotCorrectable
            }
            _ => {
                warn!(value = raw, "unrecognised correctability, assuming correctable");
                Correctability::Correctable
            }
        }
    }
}

/// A schedule milestone (submission deadline, clarification window, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Any further metadata recorded for the milestone
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Milestone {
    pub fn on(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            ..Default::default()
        }
    }

    /// The milestone date, if it is an ISO `YYYY-MM-DD` prefix.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let date = self.date.as_deref()?.trim();
        NaiveDate::parse_from_str(date.get(..10).unwrap_or(date), "%Y-%m-%d").ok()
    }
}

/// Milestone name → milestone
pub type Schedule = BTreeMap<String, Milestone>;

/// Decode a stored schedule. Older rows store plain date strings per milestone.
pub fn schedule_from_json(json: &str) -> Schedule {
    let raw: BTreeMap<String, Value> = match serde_json::from_str(json) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "unreadable schedule JSON, using an empty schedule");
            return Schedule::new();
        }
    };

    raw.into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(date) => Some((name, Milestone::on(date))),
            Value::Object(_) => match serde_json::from_value(value) {
                Ok(milestone) => Some((name, milestone)),
                Err(e) => {
                    warn!(milestone = %name, error = %e, "skipping unreadable milestone");
                    None
                }
            },
            Value::Null => None,
            other => Some((
                name,
                Milestone {
                    note: Some(other.to_string()),
                    ..Default::default()
                },
            )),
        })
        .collect()
}

/// A sub-unit of a tender with its own budget and award outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lot {
    pub number: String,
    pub name: String,
    pub base_amount: f64,
    pub personal_budget_amount: f64,
    pub offered_amount: f64,
    pub participating: bool,
    pub phase_passed: bool,
    pub assigned_company: Option<String>,
    /// Derived from the tender's recorded lot winners
    pub winner_name: String,
    /// Derived from the tender's recorded lot winners
    pub won_by_us: bool,
}

impl Default for Lot {
    fn default() -> Self {
        Self {
            number: String::new(),
            name: String::new(),
            base_amount: 0.0,
            personal_budget_amount: 0.0,
            offered_amount: 0.0,
            participating: true,
            phase_passed: false,
            assigned_company: None,
            winner_name: String::new(),
            won_by_us: false,
        }
    }
}

impl Lot {
    pub fn new(number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A document the contracting institution requires from bidders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestedDocument {
    /// Stable row id; external dossier records point at it
    pub id: Option<i64>,
    pub code: String,
    pub name: String,
    pub category: String,
    pub comment: String,
    pub submitted: bool,
    pub correctable: Correctability,
    pub file_path: Option<String>,
    pub responsible: Option<String>,
    pub reviewed: bool,
    pub mandatory: bool,
    pub order_index: i64,
    pub needs_correction: bool,
}

impl RequestedDocument {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One bidder's offer on one lot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bid {
    pub lot_number: String,
    pub amount: Option<f64>,
    pub passed_phase_a: bool,
    pub delivery_term: Option<String>,
    pub warranty_months: Option<i64>,
    /// Derived from the tender's recorded lot winners
    pub winner: bool,
}

/// A competing (or own) entity and its per-lot bids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bidder {
    pub name: String,
    pub comment: String,
    pub bids: Vec<Bid>,
}

impl Bidder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A bidder disqualified on account of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disqualification {
    pub bidder_name: String,
    /// Row id of the offending requested document
    pub document_id: Option<i64>,
    /// Code of the offending document; resolves `document_id` for documents
    /// that have not been saved yet
    pub document_code: Option<String>,
    pub reason: String,
}

/// A scored evaluation criterion for a bidder (optionally per lot)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    pub bidder_name: String,
    pub lot_number: Option<String>,
    pub criterion: String,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub comment: Option<String>,
}

/// A recorded award of a lot. Several winners may be recorded for one lot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LotWinner {
    pub lot_number: String,
    pub winner_name: String,
    /// Set when the winner is one of our companies
    pub company_name: Option<String>,
}

/// The tender aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenderRecord {
    pub id: Option<i64>,
    pub title: String,
    pub process_number: String,
    pub institution: String,
    pub state: TenderState,
    pub technical_phase_passed: bool,
    pub economic_phase_passed: bool,
    pub awarded: bool,
    pub awardee: Option<String>,
    pub disqualification_reason: Option<String>,
    pub created_on: Option<NaiveDate>,
    pub schedule: Schedule,
    pub evaluation_params: BTreeMap<String, Value>,
    /// Concurrency token, refreshed by every successful save
    pub updated_at: Option<String>,
    pub lots: Vec<Lot>,
    pub documents: Vec<RequestedDocument>,
    pub bidders: Vec<Bidder>,
    pub our_companies: BTreeSet<String>,
    pub disqualifications: Vec<Disqualification>,
    pub evaluations: Vec<Evaluation>,
    pub lot_winners: Vec<LotWinner>,
}

impl TenderRecord {
    /// A new, unsaved tender with no children.
    pub fn new(title: impl Into<String>, process_number: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            process_number: process_number.into(),
            ..Default::default()
        }
    }

    pub fn lot(&self, number: &str) -> Option<&Lot> {
        self.lots.iter().find(|l| l.number.trim() == number.trim())
    }

    /// Trimmed, non-empty, deduplicated company names.
    pub fn normalized_companies(&self) -> BTreeSet<String> {
        self.our_companies
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether `name` is one of our companies.
    pub fn is_ours(&self, name: &str) -> bool {
        self.our_companies.iter().any(|c| names_match(c, name))
    }

    /// Record `winner_name` as a winner of lot `lot_number` and refresh the
    /// derived winner fields.
    pub fn record_winner(&mut self, lot_number: impl Into<String>, winner_name: impl Into<String>) {
        let lot_number = lot_number.into();
        let winner_name = winner_name.into();
        let company_name = self
            .our_companies
            .iter()
            .find(|c| names_match(c, &winner_name))
            .cloned();

        let already = self
            .lot_winners
            .iter_mut()
            .find(|w| w.lot_number == lot_number && names_match(&w.winner_name, &winner_name));
        match already {
            Some(existing) => existing.company_name = company_name,
            None => self.lot_winners.push(LotWinner {
                lot_number,
                winner_name,
                company_name,
            }),
        }
        self.stamp_winners();
    }

    /// Recompute lot winner names, won-by-us flags and bid winner flags from
    /// `lot_winners`.
    ///
    /// A lot shows its first recorded winner; it counts as won by us when any
    /// recorded winner carries an associated company or matches the lot's
    /// assigned company.
    pub fn stamp_winners(&mut self) {
        for lot in &mut self.lots {
            lot.winner_name.clear();
            lot.won_by_us = false;
        }
        for bid in self.bidders.iter_mut().flat_map(|b| b.bids.iter_mut()) {
            bid.winner = false;
        }

        for winner in &self.lot_winners {
            if let Some(lot) = self
                .lots
                .iter_mut()
                .find(|l| l.number.trim() == winner.lot_number.trim())
            {
                if lot.winner_name.is_empty() {
                    lot.winner_name = winner.winner_name.clone();
                }
                let matches_assigned = lot
                    .assigned_company
                    .as_deref()
                    .is_some_and(|c| names_match(c, &winner.winner_name));
                if winner.company_name.is_some() || matches_assigned {
                    lot.won_by_us = true;
                }
            }

            for bidder in self
                .bidders
                .iter_mut()
                .filter(|b| names_match(&b.name, &winner.winner_name))
            {
                for bid in bidder
                    .bids
                    .iter_mut()
                    .filter(|b| b.lot_number.trim() == winner.lot_number.trim())
                {
                    bid.winner = true;
                }
            }
        }
    }

    /// Winners named on lots through `winner_name` that `lot_winners` does
    /// not hold yet, with the company resolved as [`record_winner`] does.
    ///
    /// [`record_winner`]: TenderRecord::record_winner
    pub fn unrecorded_lot_winners(&self) -> Vec<LotWinner> {
        let mut found: Vec<LotWinner> = Vec::new();
        for lot in &self.lots {
            let (number, name) = (lot.number.trim(), lot.winner_name.trim());
            if number.is_empty() || name.is_empty() {
                continue;
            }
            let known = self
                .lot_winners
                .iter()
                .chain(found.iter())
                .any(|w| w.lot_number.trim() == number && names_match(&w.winner_name, name));
            if known {
                continue;
            }
            let company_name = self
                .our_companies
                .iter()
                .find(|c| names_match(c, name))
                .cloned();
            found.push(LotWinner {
                lot_number: number.to_string(),
                winner_name: name.to_string(),
                company_name,
            });
        }
        found
    }
}

/// Case-insensitive comparison of trimmed names.
pub fn names_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Order lot numbers: numeric-looking numbers compare as integers and sort
/// before everything else; the rest compare lexically.
pub fn compare_lot_numbers(a: &str, b: &str) -> Ordering {
    let (ta, tb) = (a.trim(), b.trim());
    match (ta.parse::<i64>(), tb.parse::<i64>()) {
        (Ok(na), Ok(nb)) => na.cmp(&nb).then_with(|| ta.cmp(tb)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => ta.cmp(tb),
    }
}
