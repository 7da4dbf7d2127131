//! Durable event log persistence
//!
//! Backs the Event Log module: every notable control-plane action is
//! appended here in addition to being broadcast live on the in-memory
//! `events::EventBus`, so clients that weren't subscribed at the time can
//! still page through history.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Option<i64>,
    pub environment_id: Option<String>,
    pub container_id: Option<String>,
    /// Dotted kind, e.g. "container.updated", "backup.created", "gitops.synced"
    pub kind: String,
    pub message: String,
    /// "info" | "success" | "warning" | "error"
    pub severity: String,
    /// JSON-encoded structured payload
    pub metadata: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl EventRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: None,
            environment_id: None,
            container_id: None,
            kind: kind.into(),
            message: message.into(),
            severity: "info".to_string(),
            metadata: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_environment(mut self, id: impl Into<String>) -> Self {
        self.environment_id = Some(id.into());
        self
    }

    pub fn with_container(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub struct EventStore;

impl EventStore {
    pub fn new() -> Self {
        Self
    }

    pub fn append(&self, conn: &Connection, event: &EventRecord) -> DatabaseResult<i64> {
        let metadata_json = event
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        conn.execute(
            r#"
            INSERT INTO events (environment_id, container_id, kind, message, severity, metadata, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                event.environment_id,
                event.container_id,
                event.kind,
                event.message,
                event.severity,
                metadata_json,
                event.timestamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent(&self, conn: &Connection, limit: usize) -> DatabaseResult<Vec<EventRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, environment_id, container_id, kind, message, severity, metadata, timestamp
            FROM events ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt
            .query_map([limit as i64], Self::row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn for_container(&self, conn: &Connection, container_id: &str, limit: usize) -> DatabaseResult<Vec<EventRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, environment_id, container_id, kind, message, severity, metadata, timestamp
            FROM events WHERE container_id = ?1 ORDER BY id DESC LIMIT ?2
            "#,
        )?;
        let rows = stmt
            .query_map(rusqlite::params![container_id, limit as i64], Self::row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete events older than `older_than_secs` seconds ago. Retention is
    /// driven by the `eventCleanupInterval` setting via the scheduler's
    /// `event_cleanup` job.
    pub fn cleanup(&self, conn: &Connection, older_than_secs: i64) -> DatabaseResult<usize> {
        let cutoff = chrono::Utc::now().timestamp() - older_than_secs;
        let deleted = conn.execute("DELETE FROM events WHERE timestamp < ?1", [cutoff])?;
        Ok(deleted)
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<EventRecord> {
        let metadata_str: Option<String> = row.get(6)?;
        Ok(EventRecord {
            id: Some(row.get(0)?),
            environment_id: row.get(1)?,
            container_id: row.get(2)?,
            kind: row.get(3)?,
            message: row.get(4)?,
            severity: row.get(5)?,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            timestamp: row.get(7)?,
        })
    }
}

impl Default for EventStore {
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
            CREATE TABLE events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                environment_id TEXT,
                container_id TEXT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                severity TEXT NOT NULL DEFAULT 'info',
                metadata TEXT,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_append_and_recent() {
        let conn = setup_db();
        let store = EventStore::new();

        store.append(&conn, &EventRecord::new("container.updated", "nginx updated")).unwrap();
        store.append(&conn, &EventRecord::new("backup.created", "backup done")).unwrap();

        let events = store.recent(&conn, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "backup.created");
    }

    #[test]
    fn test_cleanup_retains_recent() {
        let conn = setup_db();
        let store = EventStore::new();

        let mut old = EventRecord::new("environment.heartbeat", "ok");
        old.timestamp = 0;
        store.append(&conn, &old).unwrap();
        store.append(&conn, &EventRecord::new("environment.heartbeat", "ok")).unwrap();

        let deleted = store.cleanup(&conn, 60).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.recent(&conn, 10).unwrap().len(), 1);
    }
}
