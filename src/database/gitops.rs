//! GitOps sync target persistence

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOpsTarget {
    pub id: String,
    pub environment_id: String,
    pub repo_url: String,
    pub branch: String,
    /// Compose project name passed to `docker compose -p`; defaults to the
    /// target id when unset.
    pub project_name: String,
    /// Path to the compose manifest within the checked-out repo
    pub compose_path: String,
    pub auto_sync: bool,
    /// Poll interval in seconds when `auto_sync` is set; the GitOps Sync
    /// engine's own job still runs on the shared cron cadence, this only
    /// gates whether a given tick actually checks this target.
    pub sync_interval_secs: u64,
    /// Hash of the last manifest that was successfully applied
    pub last_applied_hash: Option<String>,
    pub last_synced: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

pub struct GitOpsTargetStore;

impl GitOpsTargetStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<GitOpsTarget>> {
        let result = conn.query_row(
            r#"
            SELECT id, environment_id, repo_url, branch, project_name, compose_path, auto_sync,
                   sync_interval_secs, last_applied_hash, last_synced, last_error, created_at
            FROM gitops_targets WHERE id = ?1
            "#,
            [id],
            Self::row_to_target,
        );

        match result {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<GitOpsTarget>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, environment_id, repo_url, branch, project_name, compose_path, auto_sync,
                   sync_interval_secs, last_applied_hash, last_synced, last_error, created_at
            FROM gitops_targets ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], Self::row_to_target)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert(&self, conn: &Connection, t: &GitOpsTarget) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO gitops_targets
                (id, environment_id, repo_url, branch, project_name, compose_path, auto_sync,
                 sync_interval_secs, last_applied_hash, last_synced, last_error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                environment_id = excluded.environment_id,
                repo_url = excluded.repo_url,
                branch = excluded.branch,
                project_name = excluded.project_name,
                compose_path = excluded.compose_path,
                auto_sync = excluded.auto_sync,
                sync_interval_secs = excluded.sync_interval_secs,
                last_applied_hash = excluded.last_applied_hash,
                last_synced = excluded.last_synced,
                last_error = excluded.last_error
            "#,
            rusqlite::params![
                t.id,
                t.environment_id,
                t.repo_url,
                t.branch,
                t.project_name,
                t.compose_path,
                t.auto_sync as i32,
                t.sync_interval_secs as i64,
                t.last_applied_hash,
                t.last_synced,
                t.last_error,
                t.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn record_sync(
        &self,
        conn: &Connection,
        id: &str,
        applied_hash: Option<&str>,
        synced_at: i64,
        error: Option<&str>,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE gitops_targets
            SET last_applied_hash = COALESCE(?2, last_applied_hash),
                last_synced = ?3,
                last_error = ?4
            WHERE id = ?1
            "#,
            rusqlite::params![id, applied_hash, synced_at, error],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM gitops_targets WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<GitOpsTarget> {
        Ok(GitOpsTarget {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            repo_url: row.get(2)?,
            branch: row.get(3)?,
            project_name: row.get(4)?,
            compose_path: row.get(5)?,
            auto_sync: row.get::<_, i32>(6)? != 0,
            sync_interval_secs: row.get::<_, i64>(7)? as u64,
            last_applied_hash: row.get(8)?,
            last_synced: row.get(9)?,
            last_error: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl Default for GitOpsTargetStore {
    fn default() -> Self {
        Self::new()
    }
}
