//! Job Scheduler
//!
//! Cron-driven scheduling for the control plane's maintenance jobs
//! (environment health, event cleanup, image polling, auto-update,
//! scheduled prune, GitOps sync, vulnerability scan, analytics heartbeat).
//! The jobs themselves are wired up in `jobs`, which owns the `Scheduler`
//! instance; this module only provides the mechanism.

mod scheduler;

pub use scheduler::{validate_cron, JobHandle, JobMeta, JobStats, Prerequisite, Scheduler, SchedulerError};
