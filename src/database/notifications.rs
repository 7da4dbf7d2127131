//! Notification channel persistence
//!
//! Backs the Notification Dispatcher: one row per configured channel, with
//! provider-specific credentials kept as an opaque JSON blob (encrypted
//! fields inside it are handled by `crypto::Vault`, same as registry
//! credentials) and a subscribed-event-kind list.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    /// discord | email | telegram | signal | slack | ntfy | pushover | gotify | matrix | webhook | apprise
    pub provider: String,
    pub enabled: bool,
    /// JSON-encoded provider config (webhook URL, bot token, recipients, ...)
    pub config: serde_json::Value,
    /// Event kinds this channel is subscribed to; empty means all kinds.
    pub events: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct NotificationChannelStore;

impl NotificationChannelStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<NotificationChannel>> {
        let result = conn.query_row(
            r#"
            SELECT id, name, provider, enabled, config, events, created_at, updated_at
            FROM notification_channels WHERE id = ?1
            "#,
            [id],
            Self::row_to_channel,
        );

        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<NotificationChannel>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, provider, enabled, config, events, created_at, updated_at
            FROM notification_channels ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], Self::row_to_channel)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn enabled(&self, conn: &Connection) -> DatabaseResult<Vec<NotificationChannel>> {
        Ok(self.all(conn)?.into_iter().filter(|c| c.enabled).collect())
    }

    pub fn upsert(&self, conn: &Connection, c: &NotificationChannel) -> DatabaseResult<()> {
        let config_json = serde_json::to_string(&c.config).map_err(|e| super::DatabaseError::Serialization(e.to_string()))?;
        let events_json = serde_json::to_string(&c.events).map_err(|e| super::DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO notification_channels (id, name, provider, enabled, config, events, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                provider = excluded.provider,
                enabled = excluded.enabled,
                config = excluded.config,
                events = excluded.events,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                c.id,
                c.name,
                c.provider,
                c.enabled as i32,
                config_json,
                events_json,
                c.created_at,
                c.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM notification_channels WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<NotificationChannel> {
        let config_str: String = row.get(4)?;
        let events_str: String = row.get(5)?;
        Ok(NotificationChannel {
            id: row.get(0)?,
            name: row.get(1)?,
            provider: row.get(2)?,
            enabled: row.get::<_, i32>(3)? != 0,
            config: serde_json::from_str(&config_str).unwrap_or(serde_json::Value::Null),
            events: serde_json::from_str(&events_str).unwrap_or_default(),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl Default for NotificationChannelStore {
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
            CREATE TABLE notification_channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL,
                events TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .unwrap();
        conn
    }

    fn sample(id: &str) -> NotificationChannel {
        NotificationChannel {
            id: id.to_string(),
            name: "ops-discord".to_string(),
            provider: "discord".to_string(),
            enabled: true,
            config: serde_json::json!({"webhook_url": "https://discord.example/hook"}),
            events: vec!["container.error".to_string()],
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = setup_db();
        let store = NotificationChannelStore::new();
        store.upsert(&conn, &sample("chan-1")).unwrap();

        let fetched = store.get(&conn, "chan-1").unwrap().unwrap();
        assert_eq!(fetched.provider, "discord");
        assert_eq!(fetched.events, vec!["container.error"]);
    }

    #[test]
    fn test_enabled_filters_disabled_channels() {
        let conn = setup_db();
        let store = NotificationChannelStore::new();
        store.upsert(&conn, &sample("chan-1")).unwrap();

        let mut disabled = sample("chan-2");
        disabled.enabled = false;
        store.upsert(&conn, &disabled).unwrap();

        let enabled = store.enabled(&conn).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "chan-1");
    }
}
