//! Master/reference lists shared by many tenders

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::session::{table_exists, Session};
use crate::error::{Result, StoreError};
use crate::model::Correctability;

/// A row type stored in one of the master tables
pub trait MasterRecord: Sized {
    const TABLE: &'static str;
    /// Unique key column (used for upserts and removal)
    const KEY: &'static str;
    /// Columns written on upsert, key first
    const COLUMNS: &'static [&'static str];

    fn key(&self) -> &str;

    /// Values for [`Self::COLUMNS`], in order
    fn values(&self) -> Vec<SqlValue>;

    /// Map a `SELECT *` row (columns read by name)
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text(value: &Option<String>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s.clone()),
        None => SqlValue::Null,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Company {
    pub name: String,
    pub tax_id: Option<String>,
    pub contact: Option<String>,
}

impl MasterRecord for Company {
    const TABLE: &'static str = "companies";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [&'static str] = &["name", "tax_id", "contact"];

    fn key(&self) -> &str {
        &self.name
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.name.trim().to_string()),
            text(&self.tax_id),
            text(&self.contact),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            tax_id: row.get("tax_id")?,
            contact: row.get("contact")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Institution {
    pub name: String,
    pub kind: Option<String>,
}

impl MasterRecord for Institution {
    const TABLE: &'static str = "institutions";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [&'static str] = &["name", "kind"];

    fn key(&self) -> &str {
        &self.name
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Text(self.name.trim().to_string()), text(&self.kind)]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            kind: row.get("kind")?,
        })
    }
}

/// A reusable requested-document definition, one per code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentTemplate {
    pub id: Option<i64>,
    pub code: String,
    pub name: String,
    pub category: Option<String>,
    pub correctable: Correctability,
    pub mandatory: bool,
}

impl MasterRecord for DocumentTemplate {
    const TABLE: &'static str = "document_templates";
    const KEY: &'static str = "code";
    const COLUMNS: &'static [&'static str] =
        &["code", "name", "category", "correctable", "mandatory"];

    fn key(&self) -> &str {
        &self.code
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.code.trim().to_string()),
            SqlValue::Text(self.name.clone()),
            text(&self.category),
            SqlValue::Text(self.correctable.as_str().to_string()),
            SqlValue::Integer(self.mandatory as i64),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let correctable: Option<String> = row.get("correctable")?;
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
            category: row.get("category")?,
            correctable: Correctability::from_stored(correctable.as_deref()),
            mandatory: row.get::<_, Option<i64>>("mandatory")?.unwrap_or(0) != 0,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Competitor {
    pub name: String,
    pub tax_id: Option<String>,
    pub comment: Option<String>,
}

impl MasterRecord for Competitor {
    const TABLE: &'static str = "competitors";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [&'static str] = &["name", "tax_id", "comment"];

    fn key(&self) -> &str {
        &self.name
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.name.trim().to_string()),
            text(&self.tax_id),
            text(&self.comment),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            tax_id: row.get("tax_id")?,
            comment: row.get("comment")?,
        })
    }
}

/// A person who can be made responsible for documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Responsible {
    pub name: String,
    pub email: Option<String>,
}

impl MasterRecord for Responsible {
    const TABLE: &'static str = "responsibles";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [&'static str] = &["name", "email"];

    fn key(&self) -> &str {
        &self.name
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Text(self.name.trim().to_string()), text(&self.email)]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            email: row.get("email")?,
        })
    }
}

/// Maintenance of the master lists
pub struct Catalog<'a> {
    session: &'a Session,
}

impl<'a> Catalog<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// All entries ordered by key. A missing table yields an empty list.
    pub fn list<T: MasterRecord>(&self) -> Result<Vec<T>> {
        let conn = self.session.conn();
        if !table_exists(conn, T::TABLE)? {
            debug!(table = T::TABLE, "master table missing, returning empty list");
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} COLLATE NOCASE",
            T::TABLE,
            T::KEY
        ))?;
        let rows = stmt
            .query_map([], |row| T::from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert or update the entry with the same key.
    pub fn upsert<T: MasterRecord>(&self, record: &T) -> Result<()> {
        if record.key().trim().is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "{} entry needs a non-empty {}",
                T::TABLE,
                T::KEY
            )));
        }
        let placeholders = (1..=T::COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = T::COLUMNS[1..]
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({cols}) VALUES ({placeholders})
             ON CONFLICT({key}) DO UPDATE SET {updates}",
            table = T::TABLE,
            cols = T::COLUMNS.join(", "),
            key = T::KEY,
        );
        self.session
            .conn()
            .execute(&sql, params_from_iter(record.values()))?;
        Ok(())
    }

    /// Remove the entry with `key`; `false` when there was none.
    pub fn remove<T: MasterRecord>(&self, key: &str) -> Result<bool> {
        let removed = self.session.conn().execute(
            &format!("DELETE FROM {} WHERE {} = ?1", T::TABLE, T::KEY),
            [key.trim()],
        )?;
        Ok(removed > 0)
    }
}
