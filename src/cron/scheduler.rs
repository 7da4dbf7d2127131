//! Core scheduler implementation
//!
//! Keeps the shape of a hand-rolled job registry — atomic enabled flag, run
//! statistics, a cancellable handle per job — but drives ticks from a real
//! `tokio_cron_scheduler::JobScheduler` instead of a fixed interval, so job
//! cadences are genuine 6-field cron expressions rather than `Duration`s.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job already exists: {0}")]
    JobExists(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] JobSchedulerError),

    #[error("{0}")]
    Other(String),
}

/// Validate a 6-field cron expression without registering anything. Used by
/// the Settings Store to reject a batch write containing a malformed
/// cron-valued key before any of it commits.
pub fn validate_cron(expr: &str) -> Result<(), JobSchedulerError> {
    CronJob::new(expr, |_, _| {}).map(|_| ())
}

#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_run: Option<Instant>,
    pub last_duration_ms: u64,
}

/// A condition that must hold for a job to actually do work on a tick. Ticks
/// still happen on schedule for a prerequisite-gated job; they just no-op.
/// `setting_key` is kept for display purposes (which setting gates this job);
/// `check` closes over whatever store actually holds that setting's value.
pub struct Prerequisite {
    pub setting_key: String,
    pub check: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Registered job metadata, independent of the underlying cron scheduler's
/// own bookkeeping. `running` prevents a tick from overlapping a still
/// in-flight previous run — per spec, the scheduler defers rather than runs
/// concurrently.
pub struct JobMeta {
    pub name: String,
    pub cron: RwLock<String>,
    pub enabled: AtomicBool,
    pub can_run_manually: bool,
    pub running: AtomicBool,
    pub cancel: CancellationToken,
    prerequisite: RwLock<Option<Prerequisite>>,
    stats: RwLock<JobStats>,
}

impl JobMeta {
    pub async fn stats(&self) -> JobStats {
        self.stats.read().await.clone()
    }

    async fn record_run(&self, success: bool, duration: Duration) {
        let mut stats = self.stats.write().await;
        stats.run_count += 1;
        if success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.last_run = Some(Instant::now());
        stats.last_duration_ms = duration.as_millis() as u64;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

pub type JobHandle = Arc<JobMeta>;
pub type TaskFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Cron-driven job scheduler. One instance owns the manager-wide set of
/// maintenance jobs; agent-mode processes never construct one, since cron
/// jobs are manager-only per spec.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: RwLock<HashMap<String, JobHandle>>,
    tasks: RwLock<HashMap<String, TaskFn>>,
    /// The underlying cron scheduler's own job id, needed to cancel the old
    /// timer before installing a new one on reschedule.
    uuids: RwLock<HashMap<String, uuid::Uuid>>,
}

impl Scheduler {
    pub async fn new() -> Result<Self, SchedulerError> {
        let inner = JobScheduler::new().await.map_err(SchedulerError::InvalidCron)?;
        Ok(Self {
            inner,
            jobs: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            uuids: RwLock::new(HashMap::new()),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.inner.start().await.map_err(SchedulerError::InvalidCron)
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let jobs = self.jobs.read().await;
        for job in jobs.values() {
            job.cancel.cancel();
        }
        drop(jobs);
        self.inner.shutdown().await.map_err(SchedulerError::InvalidCron)
    }

    /// Register a cron-scheduled job. `task` runs only when the job is
    /// enabled; overlapping ticks are skipped, not queued.
    pub async fn schedule<F, Fut>(
        &self,
        name: impl Into<String>,
        cron: &str,
        can_run_manually: bool,
        task: F,
    ) -> Result<JobHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        {
            let jobs = self.jobs.read().await;
            if jobs.contains_key(&name) {
                return Err(SchedulerError::JobExists(name));
            }
        }

        let meta = Arc::new(JobMeta {
            name: name.clone(),
            cron: RwLock::new(cron.to_string()),
            enabled: AtomicBool::new(true),
            can_run_manually,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            prerequisite: RwLock::new(None),
            stats: RwLock::new(JobStats::default()),
        });

        let task: TaskFn = Arc::new(move || Box::pin(task()));

        self.jobs.write().await.insert(name.clone(), meta.clone());
        self.tasks.write().await.insert(name.clone(), task.clone());

        let meta_for_job = meta.clone();
        let job = CronJob::new_async(cron, move |_uuid, _lock| {
            let meta = meta_for_job.clone();
            let task = task.clone();
            Box::pin(async move {
                Self::run_once(&meta, &task).await;
            })
        })
        .map_err(SchedulerError::InvalidCron)?;

        let uuid = self.inner.add(job).await.map_err(SchedulerError::InvalidCron)?;
        self.uuids.write().await.insert(name.clone(), uuid);

        info!("scheduled job {} ({})", name, cron);
        Ok(meta)
    }

    /// Gate a scheduled job behind a condition checked on every tick. A tick
    /// still fires on schedule; it just no-ops (no stats recorded) while the
    /// condition is false.
    pub async fn set_prerequisite(&self, name: &str, prerequisite: Prerequisite) -> Result<(), SchedulerError> {
        let meta = self.jobs.read().await.get(name).cloned().ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        *meta.prerequisite.write().await = Some(prerequisite);
        Ok(())
    }

    /// Reconfigure an already-scheduled job's cron expression in place.
    /// Cancels the old timer before installing the new one, so a tick that
    /// would have fired under the old expression never overlaps a run
    /// started under the new one. Called by the composition root in
    /// response to `SettingsStore`'s change notification (§4.5).
    pub async fn reschedule(&self, name: &str, new_cron: &str) -> Result<(), SchedulerError> {
        let meta = self.jobs.read().await.get(name).cloned().ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        let task = self.tasks.read().await.get(name).cloned().ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;

        if let Some(old_uuid) = self.uuids.write().await.remove(name) {
            self.inner.remove(&old_uuid).await.map_err(SchedulerError::InvalidCron)?;
        }

        // Wait out any in-flight run so the old and new schedules never
        // produce overlapping executions of the same job.
        while meta.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        *meta.cron.write().await = new_cron.to_string();

        let meta_for_job = meta.clone();
        let job = CronJob::new_async(new_cron, move |_uuid, _lock| {
            let meta = meta_for_job.clone();
            let task = task.clone();
            Box::pin(async move {
                Self::run_once(&meta, &task).await;
            })
        })
        .map_err(SchedulerError::InvalidCron)?;

        let new_uuid = self.inner.add(job).await.map_err(SchedulerError::InvalidCron)?;
        self.uuids.write().await.insert(name.to_string(), new_uuid);

        info!("rescheduled job {} to {}", name, new_cron);
        Ok(())
    }

    async fn run_once(meta: &JobMeta, task: &TaskFn) {
        if !meta.is_enabled() {
            debug!("job {} ticked but disabled, skipping", meta.name);
            return;
        }
        if meta.running.swap(true, Ordering::SeqCst) {
            warn!("job {} ticked while a previous run is still in flight, deferring", meta.name);
            return;
        }

        if let Some(prerequisite) = meta.prerequisite.read().await.as_ref() {
            if !(prerequisite.check)() {
                debug!("job {} ticked but prerequisite {} unmet, skipping", meta.name, prerequisite.setting_key);
                meta.running.store(false, Ordering::SeqCst);
                return;
            }
        }

        let start = Instant::now();
        let result = tokio::spawn(task());

        match result.await {
            Ok(_) => meta.record_run(true, start.elapsed()).await,
            Err(e) => {
                error!("job {} panicked: {}", meta.name, e);
                meta.record_run(false, start.elapsed()).await;
            }
        }

        meta.running.store(false, Ordering::SeqCst);
    }

    /// Run a job immediately, outside its schedule. Detaches from any
    /// caller-supplied cancellation: a UI disconnect must not abort a
    /// manually-triggered run once started.
    pub async fn run_now(&self, name: &str) -> Result<(), SchedulerError> {
        let jobs = self.jobs.read().await;
        let meta = jobs.get(name).ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?.clone();
        drop(jobs);

        if !meta.can_run_manually {
            return Err(SchedulerError::Other(format!("job {name} cannot be run manually")));
        }

        let tasks = self.tasks.read().await;
        let task = tasks.get(name).ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?.clone();
        drop(tasks);

        tokio::spawn(async move {
            Self::run_once(&meta, &task).await;
        });

        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<JobHandle> {
        self.jobs.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }

    pub async fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        self.jobs
            .read()
            .await
            .get(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?
            .enable();
        Ok(())
    }

    pub async fn disable(&self, name: &str) -> Result<(), SchedulerError> {
        self.jobs
            .read()
            .await
            .get(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?
            .disable();
        Ok(())
    }

    pub async fn stats(&self, name: &str) -> Result<JobStats, SchedulerError> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(name).ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        Ok(job.stats().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_validate_cron_accepts_six_fields() {
        assert!(validate_cron("0 */15 * * * *").is_ok());
    }

    #[test]
    fn test_validate_cron_rejects_garbage() {
        assert!(validate_cron("not a cron").is_err());
    }

    #[tokio::test]
    async fn test_schedule_rejects_duplicate_name() {
        let scheduler = Scheduler::new().await.unwrap();
        scheduler.schedule("dup", "0 * * * * *", true, || async {}).await.unwrap();
        let err = scheduler.schedule("dup", "0 * * * * *", true, || async {}).await;
        assert!(matches!(err, Err(SchedulerError::JobExists(_))));
    }

    #[tokio::test]
    async fn test_disabled_job_does_not_run() {
        let scheduler = Scheduler::new().await.unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let handle = scheduler
            .schedule("noop", "0 * * * * *", true, move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        handle.disable();
        Scheduler::run_once(&handle, &scheduler.tasks.read().await.get("noop").unwrap().clone()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manual_run_rejected_when_not_allowed() {
        let scheduler = Scheduler::new().await.unwrap();
        scheduler.schedule("locked", "0 * * * * *", false, || async {}).await.unwrap();
        let result = scheduler.run_now("locked").await;
        assert!(result.is_err());
    }
}
