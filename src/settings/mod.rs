//! Settings Store
//!
//! In-memory cache over [`crate::database::SettingStore`] with write-through
//! persistence and change notification, mirroring the way the teacher's
//! `Configuration` deserializes typed values with defaults — except settings
//! here are runtime-mutable, so reads go through a cache instead of a
//! one-shot deserialize at startup.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cron::validate_cron;
use crate::database::Database;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("invalid cron expression for {key}: {source}")]
    InvalidCron { key: String, source: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Keys whose value must parse as a 6-field cron expression before a batch
/// write is allowed to commit.
const CRON_KEYS: &[&str] = &[
    "scheduler.environment_health_cron",
    "scheduler.event_cleanup_cron",
    "scheduler.analytics_heartbeat_cron",
    "scheduler.auto_update_cron",
    "scheduler.image_polling_cron",
    "scheduler.scheduled_prune_cron",
    "scheduler.gitops_sync_cron",
    "scheduler.vulnerability_scan_cron",
];

pub struct SettingsStore {
    db: Arc<Database>,
    cache: DashMap<String, String>,
    /// Fires the list of keys that changed on every committed write batch;
    /// the Job Scheduler subscribes and reschedules only the affected jobs.
    changes: broadcast::Sender<Vec<String>>,
}

impl SettingsStore {
    pub async fn load(db: Arc<Database>) -> SettingsResult<Self> {
        let (changes, _rx) = broadcast::channel(64);
        let store = Self { db, cache: DashMap::new(), changes };
        store.reload().await?;
        Ok(store)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.changes.subscribe()
    }

    async fn reload(&self) -> SettingsResult<()> {
        let conn = self.db.conn().await;
        let all = self.db.settings.all(&conn)?;
        drop(conn);

        self.cache.clear();
        for (k, v) in all {
            self.cache.insert(k, v);
        }
        Ok(())
    }

    /// Key miss returns the caller-supplied default without touching the
    /// database.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.cache.get(key).map(|v| v.clone()).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.cache
            .get(key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        self.cache
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    }

    /// Snapshot of every cached key, for the settings listing endpoint.
    pub fn all(&self) -> HashMap<String, String> {
        self.cache.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Write a batch of key/value pairs as a single transaction. Any
    /// cron-valued key in the batch is validated before anything commits;
    /// a single invalid expression rejects the whole batch.
    pub async fn set_batch(&self, values: HashMap<String, String>) -> SettingsResult<()> {
        for (key, value) in &values {
            if CRON_KEYS.contains(&key.as_str()) {
                if let Err(e) = validate_cron(value) {
                    return Err(SettingsError::InvalidCron { key: key.clone(), source: e.to_string() });
                }
            }
        }

        let conn = self.db.conn().await;
        for (key, value) in &values {
            self.db.settings.set(&conn, key, value)?;
        }
        drop(conn);

        self.reload().await?;

        let changed_keys: Vec<String> = values.keys().cloned().collect();
        info!("settings batch committed: {:?}", changed_keys);
        if self.changes.send(changed_keys.clone()).is_err() {
            warn!("settings change notification had no subscribers");
        }

        Ok(())
    }

    pub async fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        self.set_batch(HashMap::from([(key.to_string(), value.to_string())])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_on_miss() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SettingsStore::load(db).await.unwrap();
        assert_eq!(store.get_or("nope", "fallback"), "fallback");
    }

    #[tokio::test]
    async fn test_set_and_reload_cache() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SettingsStore::load(db).await.unwrap();

        store.set("auto_update.enabled", "true").await.unwrap();
        assert!(store.get_bool_or("auto_update.enabled", false));
    }

    #[tokio::test]
    async fn test_invalid_cron_rejects_batch() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SettingsStore::load(db).await.unwrap();

        let result = store
            .set_batch(HashMap::from([
                ("scheduler.image_polling_cron".to_string(), "not a cron".to_string()),
            ]))
            .await;

        assert!(result.is_err());
        assert_eq!(store.get_or("scheduler.image_polling_cron", "unset"), "unset");
    }

    #[tokio::test]
    async fn test_change_notification_fires() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SettingsStore::load(db).await.unwrap();
        let mut rx = store.subscribe();

        store.set("notifications.enabled", "true").await.unwrap();

        let changed = rx.recv().await.unwrap();
        assert_eq!(changed, vec!["notifications.enabled".to_string()]);
    }
}
