//! Persistent store for the control plane
//!
//! Backs the Environment Registry, Settings Store, Job Scheduler, Image
//! Update Engine, Volume Backup engine, Event Log and API key auth with a
//! single SQLite database opened in WAL mode.

mod apikeys;
mod backups;
mod environment;
mod events;
mod gitops;
mod images;
mod notifications;
mod schedules;
mod settings;

pub use apikeys::{ApiKey, ApiKeyStore};
pub use backups::{VolumeBackup, VolumeBackupStore};
pub use environment::{Environment, EnvironmentStatus, EnvironmentStore, LOCAL_ENVIRONMENT_ID};
pub use events::{EventRecord, EventStore};
pub use gitops::{GitOpsTarget, GitOpsTargetStore};
pub use notifications::{NotificationChannel, NotificationChannelStore};
pub use images::{ImageUpdateRecord, ImageUpdateStore, RegistryCredential, RegistryCredentialStore, UpdateType};
pub use schedules::{JobSchedule, JobScheduleStore};
pub use settings::SettingStore;

use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Main database wrapper. Every table is accessed through a `*Store` that
/// takes a `&Connection`; the connection itself lives behind a single
/// `tokio::sync::Mutex` since sqlite only allows one writer at a time and
/// the control plane's request volume doesn't warrant a connection pool.
pub struct Database {
    conn: Mutex<Connection>,
    pub environments: EnvironmentStore,
    pub settings: SettingStore,
    pub schedules: JobScheduleStore,
    pub image_updates: ImageUpdateStore,
    pub registry_credentials: RegistryCredentialStore,
    pub volume_backups: VolumeBackupStore,
    pub events: EventStore,
    pub api_keys: ApiKeyStore,
    pub gitops_targets: GitOpsTargetStore,
    pub notification_channels: NotificationChannelStore,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_tables(&conn)?;

        info!("database opened at {:?}", path);

        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            environments: EnvironmentStore::new(),
            settings: SettingStore::new(),
            schedules: JobScheduleStore::new(),
            image_updates: ImageUpdateStore::new(),
            registry_credentials: RegistryCredentialStore::new(),
            volume_backups: VolumeBackupStore::new(),
            events: EventStore::new(),
            api_keys: ApiKeyStore::new(),
            gitops_targets: GitOpsTargetStore::new(),
            notification_channels: NotificationChannelStore::new(),
        }
    }

    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS environments (
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

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS job_schedules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                cron TEXT NOT NULL,
                enabled INTEGER DEFAULT 1,
                kind TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT '{}',
                last_run INTEGER,
                next_run INTEGER,
                last_status TEXT,
                run_count INTEGER DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_update_records (
                container_id TEXT PRIMARY KEY,
                environment_id TEXT NOT NULL,
                image TEXT NOT NULL,
                current_version TEXT,
                latest_version TEXT,
                current_digest TEXT,
                latest_digest TEXT,
                update_type TEXT NOT NULL DEFAULT 'none',
                update_available INTEGER DEFAULT 0,
                auth_method TEXT,
                auth_username TEXT,
                error TEXT,
                response_time_ms INTEGER,
                last_checked INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registry_credentials (
                id TEXT PRIMARY KEY,
                registry_host TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL,
                token TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                insecure INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS volume_backups (
                id TEXT PRIMARY KEY,
                environment_id TEXT NOT NULL,
                volume_name TEXT NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                adapter_type TEXT NOT NULL,
                is_locked INTEGER DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                environment_id TEXT,
                container_id TEXT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                severity TEXT NOT NULL DEFAULT 'info',
                metadata TEXT,
                timestamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notification_channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL,
                events TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                description TEXT,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                last_used INTEGER
            );

            CREATE TABLE IF NOT EXISTS gitops_targets (
                id TEXT PRIMARY KEY,
                environment_id TEXT NOT NULL,
                repo_url TEXT NOT NULL,
                branch TEXT NOT NULL,
                project_name TEXT NOT NULL DEFAULT '',
                compose_path TEXT NOT NULL,
                auto_sync INTEGER DEFAULT 0,
                sync_interval_secs INTEGER NOT NULL DEFAULT 300,
                last_applied_hash TEXT,
                last_synced INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_volume_backups_volume
                ON volume_backups(volume_name);

            CREATE INDEX IF NOT EXISTS idx_events_container
                ON events(container_id);

            CREATE INDEX IF NOT EXISTS idx_events_timestamp
                ON events(timestamp);
            "#,
        )?;

        Ok(())
    }

    /// Acquire the connection for a single operation. Callers should keep the
    /// guard's scope as small as possible and never hold it across an `.await`
    /// that isn't itself a database call.
    pub async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_open_creates_all_tables() {
        let db = Database::open_in_memory().unwrap();

        let conn = db.conn().await;
        db.environments
            .upsert(&conn, &Environment::new_local(LOCAL_ENVIRONMENT_ID, "Local Docker"))
            .unwrap();
        db.settings.set(&conn, "auto_update.enabled", "true").unwrap();
        drop(conn);

        let conn = db.conn().await;
        assert!(db.environments.get(&conn, LOCAL_ENVIRONMENT_ID).unwrap().is_some());
        assert_eq!(
            db.settings.get(&conn, "auto_update.enabled").unwrap(),
            Some("true".to_string())
        );
    }
}
