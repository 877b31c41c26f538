//! Generic key/value settings

use rusqlite::{params, OptionalExtension};

use super::session::Session;
use crate::error::{Result, StoreError};

pub struct Settings<'a> {
    session: &'a Session,
}

impl<'a> Settings<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .session
            .conn()
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "setting key must not be empty".to_string(),
            ));
        }
        self.session.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// `true` when a value was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .session
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    /// All pairs, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .session
            .conn()
            .prepare("SELECT key, value FROM settings ORDER BY key")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::SCHEMA_CREATE_TABLES;
    use crate::store::session::StoreOptions;

    #[test]
    fn test_settings_roundtrip() {
        let session = Session::in_memory(&StoreOptions::default()).unwrap();
        session.conn().execute_batch(SCHEMA_CREATE_TABLES).unwrap();
        let settings = Settings::new(&session);

        assert_eq!(settings.get("theme").unwrap(), None);
        settings.set("theme", "dark").unwrap();
        settings.set("theme", "light").unwrap();
        settings.set("last_export", "/tmp/out").unwrap();
        assert_eq!(settings.get("theme").unwrap().as_deref(), Some("light"));
        assert_eq!(
            settings.list().unwrap(),
            vec![
                ("last_export".to_string(), "/tmp/out".to_string()),
                ("theme".to_string(), "light".to_string()),
            ]
        );

        assert!(settings.delete("theme").unwrap());
        assert!(!settings.delete("theme").unwrap());
        assert!(settings.set(" ", "x").is_err());
    }
}
