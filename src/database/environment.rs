//! Environment registry persistence

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

/// The reserved identifier for the local Docker daemon's environment row.
/// Every other environment is a remote host reachable through a paired agent.
pub const LOCAL_ENVIRONMENT_ID: &str = "0";

/// Connectivity status of a registered environment, as observed by the
/// most recent heartbeat or connection test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Online,
    Offline,
    /// Reachable but the last operation against it failed (auth rejected,
    /// TLS handshake failed, unexpected response shape).
    Error,
    /// Registered but never successfully contacted yet.
    Pending,
    Unknown,
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentStatus::Online => write!(f, "online"),
            EnvironmentStatus::Offline => write!(f, "offline"),
            EnvironmentStatus::Error => write!(f, "error"),
            EnvironmentStatus::Pending => write!(f, "pending"),
            EnvironmentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl EnvironmentStatus {
    fn parse(s: &str) -> Self {
        match s {
            "online" => EnvironmentStatus::Online,
            "offline" => EnvironmentStatus::Offline,
            "error" => EnvironmentStatus::Error,
            "pending" => EnvironmentStatus::Pending,
            _ => EnvironmentStatus::Unknown,
        }
    }
}

/// A Docker host under Arcane's management: the local daemon (always id
/// [`LOCAL_ENVIRONMENT_ID`]), or a remote host reachable through a paired agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    /// "local" or "agent"
    pub kind: String,
    /// Base URL of the remote agent; empty for the local environment
    pub agent_url: String,
    /// Bearer token sent as `X-Arcane-Agent-Token` when dispatching to this
    /// environment's agent. Empty for the local environment, encrypted via
    /// [`crate::crypto::Vault`] before it reaches this struct for anything
    /// other than the local row.
    pub agent_token: String,
    pub status: EnvironmentStatus,
    /// Whether scheduled jobs and dispatch should consider this environment
    /// at all. An operator can disable a flaky remote without unregistering it.
    pub enabled: bool,
    pub last_heartbeat: Option<i64>,
    pub created_at: i64,
}

impl Environment {
    pub fn new_local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: "local".to_string(),
            agent_url: String::new(),
            agent_token: String::new(),
            status: EnvironmentStatus::Unknown,
            enabled: true,
            last_heartbeat: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == "local"
    }
}

pub struct EnvironmentStore;

impl EnvironmentStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<Environment>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, kind, agent_url, agent_token, status, enabled, last_heartbeat, created_at
            FROM environments WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([id], Self::row_to_environment);

        match result {
            Ok(env) => Ok(Some(env)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<Environment>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, kind, agent_url, agent_token, status, enabled, last_heartbeat, created_at
            FROM environments ORDER BY created_at ASC
            "#,
        )?;

        let envs = stmt
            .query_map([], Self::row_to_environment)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(envs)
    }

    pub fn upsert(&self, conn: &Connection, env: &Environment) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO environments
                (id, name, kind, agent_url, agent_token, status, enabled, last_heartbeat, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                agent_url = excluded.agent_url,
                agent_token = excluded.agent_token,
                status = excluded.status,
                enabled = excluded.enabled,
                last_heartbeat = excluded.last_heartbeat
            "#,
            rusqlite::params![
                env.id,
                env.name,
                env.kind,
                env.agent_url,
                env.agent_token,
                env.status.to_string(),
                env.enabled,
                env.last_heartbeat,
                env.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn set_status(
        &self,
        conn: &Connection,
        id: &str,
        status: EnvironmentStatus,
        heartbeat_at: i64,
    ) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE environments SET status = ?2, last_heartbeat = ?3 WHERE id = ?1",
            rusqlite::params![id, status.to_string(), heartbeat_at],
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, conn: &Connection, id: &str, enabled: bool) -> DatabaseResult<()> {
        conn.execute("UPDATE environments SET enabled = ?2 WHERE id = ?1", rusqlite::params![id, enabled])?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM environments WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_environment(row: &rusqlite::Row) -> rusqlite::Result<Environment> {
        let status: String = row.get(5)?;
        Ok(Environment {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            agent_url: row.get(3)?,
            agent_token: row.get(4)?,
            status: EnvironmentStatus::parse(&status),
            enabled: row.get(6)?,
            last_heartbeat: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl Default for EnvironmentStore {
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
            CREATE TABLE environments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                agent_url TEXT NOT NULL DEFAULT '',
                agent_token TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'unknown',
                enabled INTEGER NOT NULL DEFAULT 1,
                last_heartbeat INTEGER,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = setup_db();
        let store = EnvironmentStore::new();

        let env = Environment::new_local(LOCAL_ENVIRONMENT_ID, "Local Docker");
        store.upsert(&conn, &env).unwrap();

        let loaded = store.get(&conn, LOCAL_ENVIRONMENT_ID).unwrap().unwrap();
        assert_eq!(loaded.name, "Local Docker");
        assert_eq!(loaded.status, EnvironmentStatus::Unknown);
        assert!(loaded.enabled);
    }

    #[test]
    fn test_set_status_transition() {
        let conn = setup_db();
        let store = EnvironmentStore::new();
        store.upsert(&conn, &Environment::new_local(LOCAL_ENVIRONMENT_ID, "Local Docker")).unwrap();

        store.set_status(&conn, LOCAL_ENVIRONMENT_ID, EnvironmentStatus::Online, 1000).unwrap();
        let loaded = store.get(&conn, LOCAL_ENVIRONMENT_ID).unwrap().unwrap();
        assert_eq!(loaded.status, EnvironmentStatus::Online);
        assert_eq!(loaded.last_heartbeat, Some(1000));
    }

    #[test]
    fn test_set_enabled() {
        let conn = setup_db();
        let store = EnvironmentStore::new();
        store.upsert(&conn, &Environment::new_local(LOCAL_ENVIRONMENT_ID, "Local Docker")).unwrap();

        store.set_enabled(&conn, LOCAL_ENVIRONMENT_ID, false).unwrap();
        assert!(!store.get(&conn, LOCAL_ENVIRONMENT_ID).unwrap().unwrap().enabled);
    }
}
