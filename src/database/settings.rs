//! Settings store persistence
//!
//! Settings are stored as canonical strings (see SPEC_FULL.md §3) and parsed
//! at the call site by typed accessors, avoiding a schema migration for
//! every new setting.

use rusqlite::Connection;

use super::DatabaseResult;

pub struct SettingStore;

impl SettingStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, key: &str) -> DatabaseResult<Option<String>> {
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&self, conn: &Connection, key: &str, value: &str) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<(String, String)>> {
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete(&self, conn: &Connection, key: &str) -> DatabaseResult<()> {
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }
}

impl Default for SettingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_set_and_get() {
        let conn = setup_db();
        let store = SettingStore::new();

        store.set(&conn, "auto_update.enabled", "true").unwrap();
        assert_eq!(store.get(&conn, "auto_update.enabled").unwrap(), Some("true".to_string()));

        store.set(&conn, "auto_update.enabled", "false").unwrap();
        assert_eq!(store.get(&conn, "auto_update.enabled").unwrap(), Some("false".to_string()));
    }

    #[test]
    fn test_missing_key() {
        let conn = setup_db();
        let store = SettingStore::new();
        assert_eq!(store.get(&conn, "missing").unwrap(), None);
    }
}
