//! Volume backup metadata persistence

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBackup {
    pub id: String,
    pub environment_id: String,
    pub volume_name: String,
    pub name: String,
    pub checksum: Option<String>,
    pub size: u64,
    pub adapter_type: String,
    /// Set while a restore/delete that reads the archive is in flight, to
    /// prevent a concurrent delete from removing the file out from under it.
    pub is_locked: bool,
    pub created_at: i64,
}

pub struct VolumeBackupStore;

impl VolumeBackupStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<VolumeBackup>> {
        let result = conn.query_row(
            r#"
            SELECT id, environment_id, volume_name, name, checksum, size,
                   adapter_type, is_locked, created_at
            FROM volume_backups WHERE id = ?1
            "#,
            [id],
            Self::row_to_backup,
        );

        match result {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn for_volume(&self, conn: &Connection, volume_name: &str) -> DatabaseResult<Vec<VolumeBackup>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, environment_id, volume_name, name, checksum, size,
                   adapter_type, is_locked, created_at
            FROM volume_backups WHERE volume_name = ?1 ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt
            .query_map([volume_name], Self::row_to_backup)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert(&self, conn: &Connection, b: &VolumeBackup) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO volume_backups
                (id, environment_id, volume_name, name, checksum, size,
                 adapter_type, is_locked, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            rusqlite::params![
                b.id,
                b.environment_id,
                b.volume_name,
                b.name,
                b.checksum,
                b.size as i64,
                b.adapter_type,
                b.is_locked as i32,
                b.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn set_locked(&self, conn: &Connection, id: &str, locked: bool) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE volume_backups SET is_locked = ?2 WHERE id = ?1",
            rusqlite::params![id, locked as i32],
        )?;
        Ok(())
    }

    /// Delete the database row. Callers must remove the underlying archive
    /// from storage themselves; deleting the row first (and tolerating a
    /// best-effort archive delete failing afterward) means a crash between
    /// the two steps leaves an orphaned file on disk rather than a dangling
    /// database reference to a file that no longer exists.
    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM volume_backups WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_backup(row: &rusqlite::Row) -> rusqlite::Result<VolumeBackup> {
        Ok(VolumeBackup {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            volume_name: row.get(2)?,
            name: row.get(3)?,
            checksum: row.get(4)?,
            size: row.get::<_, i64>(5)? as u64,
            adapter_type: row.get(6)?,
            is_locked: row.get::<_, i32>(7)? != 0,
            created_at: row.get(8)?,
        })
    }
}

impl Default for VolumeBackupStore {
    fn default() -> Self {
        Self::new()
    }
}
