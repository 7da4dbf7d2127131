//! Job schedule persistence

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

/// A scheduled job: one of Arcane's built-in maintenance jobs, or a
/// user-defined job targeting an environment/container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSchedule {
    pub id: String,
    pub name: String,
    /// 6-field cron expression (seconds minutes hours day-of-month month day-of-week)
    pub cron: String,
    pub enabled: bool,
    /// Opaque job-kind discriminator consumed by the scheduler's job registry
    pub kind: String,
    /// JSON-encoded job-specific arguments
    pub args: String,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub last_status: Option<String>,
    pub run_count: u64,
    pub created_at: i64,
}

pub struct JobScheduleStore;

impl JobScheduleStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<JobSchedule>> {
        let result = conn.query_row(
            r#"
            SELECT id, name, cron, enabled, kind, args, last_run, next_run,
                   last_status, run_count, created_at
            FROM job_schedules WHERE id = ?1
            "#,
            [id],
            Self::row_to_schedule,
        );

        match result {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<JobSchedule>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, cron, enabled, kind, args, last_run, next_run,
                   last_status, run_count, created_at
            FROM job_schedules ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], Self::row_to_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert(&self, conn: &Connection, s: &JobSchedule) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO job_schedules
                (id, name, cron, enabled, kind, args, last_run, next_run,
                 last_status, run_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                cron = excluded.cron,
                enabled = excluded.enabled,
                kind = excluded.kind,
                args = excluded.args,
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                last_status = excluded.last_status,
                run_count = excluded.run_count
            "#,
            rusqlite::params![
                s.id,
                s.name,
                s.cron,
                s.enabled as i32,
                s.kind,
                s.args,
                s.last_run,
                s.next_run,
                s.last_status,
                s.run_count as i64,
                s.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn record_run(
        &self,
        conn: &Connection,
        id: &str,
        ran_at: i64,
        next_run: Option<i64>,
        status: &str,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE job_schedules
            SET last_run = ?2, next_run = ?3, last_status = ?4, run_count = run_count + 1
            WHERE id = ?1
            "#,
            rusqlite::params![id, ran_at, next_run, status],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM job_schedules WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<JobSchedule> {
        Ok(JobSchedule {
            id: row.get(0)?,
            name: row.get(1)?,
            cron: row.get(2)?,
            enabled: row.get::<_, i32>(3)? != 0,
            kind: row.get(4)?,
            args: row.get(5)?,
            last_run: row.get(6)?,
            next_run: row.get(7)?,
            last_status: row.get(8)?,
            run_count: row.get::<_, i64>(9)? as u64,
            created_at: row.get(10)?,
        })
    }
}

impl Default for JobScheduleStore {
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
            CREATE TABLE job_schedules (
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
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_upsert_and_record_run() {
        let conn = setup_db();
        let store = JobScheduleStore::new();

        let job = JobSchedule {
            id: "env-health".into(),
            name: "Environment health check".into(),
            cron: "0 */1 * * * *".into(),
            enabled: true,
            kind: "environment_health".into(),
            args: "{}".into(),
            last_run: None,
            next_run: None,
            last_status: None,
            run_count: 0,
            created_at: 0,
        };
        store.upsert(&conn, &job).unwrap();

        store.record_run(&conn, "env-health", 100, Some(160), "ok").unwrap();

        let loaded = store.get(&conn, "env-health").unwrap().unwrap();
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.last_run, Some(100));
        assert_eq!(loaded.last_status.as_deref(), Some("ok"));
    }
}
