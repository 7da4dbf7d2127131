//! Durable event log
//!
//! Composes the in-memory [`EventBus`] with [`crate::database::EventStore`]:
//! every call to [`Log::record`] both broadcasts live to current subscribers
//! and appends a row so the history survives a restart and can be paged by
//! clients that connect later.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::database::{Database, EventRecord};

use super::bus::{Event, EventBus};

pub struct Log {
    bus: EventBus,
    db: Arc<Database>,
}

impl Log {
    pub fn new(db: Arc<Database>) -> Self {
        Self { bus: EventBus::new(), db }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish live and persist. Persistence failures are logged, not
    /// propagated — a dropped event row should never fail the operation that
    /// produced it.
    pub async fn record(&self, event: Event) {
        self.bus.publish(event.clone());

        let record = Self::to_record(&event);
        let conn = self.db.conn().await;
        if let Err(e) = self.db.events.append(&conn, &record) {
            warn!("failed to persist event {:?}: {}", record.kind, e);
        }
    }

    pub async fn recent(&self, limit: usize) -> crate::database::DatabaseResult<Vec<EventRecord>> {
        let conn = self.db.conn().await;
        self.db.events.recent(&conn, limit)
    }

    pub async fn for_container(&self, container_id: &str, limit: usize) -> crate::database::DatabaseResult<Vec<EventRecord>> {
        let conn = self.db.conn().await;
        self.db.events.for_container(&conn, container_id, limit)
    }

    /// Delete events older than `retention_secs`. Driven by the scheduler's
    /// `event_cleanup` job.
    pub async fn cleanup(&self, retention_secs: i64) -> crate::database::DatabaseResult<usize> {
        let conn = self.db.conn().await;
        self.db.events.cleanup(&conn, retention_secs)
    }

    fn to_record(event: &Event) -> EventRecord {
        match event {
            Event::ContainerStateChanged { environment_id, container_id, state } => {
                EventRecord::new("container.state_changed", format!("state changed to {}", state))
                    .with_environment(environment_id.clone())
                    .with_container(container_id.clone())
                    .with_metadata(json!({ "state": state.to_string() }))
            }
            Event::ContainerStats { environment_id, container_id, .. } => {
                EventRecord::new("container.stats", "stats sample")
                    .with_environment(environment_id.clone())
                    .with_container(container_id.clone())
            }
            Event::ContainerLog { container_id, .. } => {
                EventRecord::new("container.log", "log line").with_container(container_id.clone())
            }
            Event::EnvironmentStatusChanged { environment_id, online } => {
                EventRecord::new(
                    "environment.status_changed",
                    if *online { "environment online" } else { "environment offline" },
                )
                .with_environment(environment_id.clone())
                .with_metadata(json!({ "online": online }))
            }
            Event::ImageUpdateAvailable { environment_id, container_id, image } => {
                EventRecord::new("image.update_available", format!("update available for {}", image))
                    .with_environment(environment_id.clone())
                    .with_container(container_id.clone())
                    .with_metadata(json!({ "image": image }))
            }
            Event::ImageUpdateApplied { environment_id, container_id, successful } => {
                EventRecord::new(
                    "image.update_applied",
                    if *successful { "image update applied" } else { "image update failed" },
                )
                .with_environment(environment_id.clone())
                .with_container(container_id.clone())
                .with_metadata(json!({ "successful": successful }))
            }
            Event::BackupStarted { backup_id, container_id } => {
                EventRecord::new("backup.started", format!("backup {} started", backup_id))
                    .with_container(container_id.clone())
                    .with_metadata(json!({ "backup_id": backup_id }))
            }
            Event::BackupCompleted { backup_id, successful, checksum, size } => {
                EventRecord::new(
                    "backup.completed",
                    if *successful { "backup completed" } else { "backup failed" },
                )
                .with_metadata(json!({
                    "backup_id": backup_id,
                    "successful": successful,
                    "checksum": checksum,
                    "size": size,
                }))
            }
            Event::RestoreStarted { backup_id, container_id } => {
                EventRecord::new("backup.restore_started", format!("restore of {} started", backup_id))
                    .with_container(container_id.clone())
            }
            Event::RestoreCompleted { backup_id, successful } => {
                EventRecord::new(
                    "backup.restore_completed",
                    if *successful { "restore completed" } else { "restore failed" },
                )
                .with_metadata(json!({ "backup_id": backup_id, "successful": successful }))
            }
            Event::GitOpsSyncStarted { target_id } => {
                EventRecord::new("gitops.sync_started", format!("sync of {} started", target_id))
            }
            Event::GitOpsSyncCompleted { target_id, successful, applied_hash } => {
                EventRecord::new(
                    "gitops.sync_completed",
                    if *successful { "sync completed" } else { "sync failed" },
                )
                .with_metadata(json!({
                    "target_id": target_id,
                    "successful": successful,
                    "applied_hash": applied_hash,
                }))
            }
            Event::ContainerError { environment_id, container_id, message } => {
                EventRecord::new("container.error", message.clone())
                    .with_environment(environment_id.clone())
                    .with_container(container_id.clone())
            }
            Event::VulnerabilityFound { environment_id, container_id, image, severity_count } => {
                EventRecord::new("image.vulnerability_found", format!("{} vulnerabilities found in {}", severity_count, image))
                    .with_environment(environment_id.clone())
                    .with_container(container_id.clone())
                    .with_metadata(json!({ "image": image, "severity_count": severity_count }))
            }
            Event::PruneCompleted { environment_id, reclaimed_bytes } => {
                EventRecord::new("environment.prune_completed", format!("reclaimed {} bytes", reclaimed_bytes))
                    .with_environment(environment_id.clone())
                    .with_metadata(json!({ "reclaimed_bytes": reclaimed_bytes }))
            }
        }
        .with_severity(event.severity().to_string())
    }
}
