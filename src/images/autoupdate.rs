//! Auto-update Orchestrator
//!
//! Drives [`ContainerUpdateExecutor`] across every candidate container
//! discovered by the Image Update Engine, the same "iterate, skip by label
//! or exclusion list, accumulate per-item outcomes" shape the teacher's
//! scheduled per-server `ScheduleAction` runner used, just over containers
//! instead of servers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::database::Database;
use crate::dispatch::Dispatcher;
use crate::notifications::{batched_image_update_payload, NotificationDispatcher};
use crate::settings::SettingsStore;

use super::{is_falsy_label, ContainerUpdateExecutor, ImagesResult, UpdateOutcome, LABEL_ARCANE_UPDATER};

const AUTO_UPDATE_USER: &str = "scheduler";

#[derive(Debug, Clone, Serialize)]
pub struct AutoUpdateItem {
    pub container_id: String,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoUpdateSummary {
    pub updated: u32,
    pub failed: u32,
    pub items: Vec<AutoUpdateItem>,
}

pub struct AutoUpdateOrchestrator {
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    executor: Arc<ContainerUpdateExecutor>,
    settings: Arc<SettingsStore>,
    notifications: Option<Arc<NotificationDispatcher>>,
}

impl AutoUpdateOrchestrator {
    pub fn new(db: Arc<Database>, dispatcher: Arc<Dispatcher>, executor: Arc<ContainerUpdateExecutor>, settings: Arc<SettingsStore>) -> Self {
        Self { db, dispatcher, executor, settings, notifications: None }
    }

    /// Batch every update from one auto-update pass into a single
    /// notification instead of one per container (§4.6).
    pub fn with_notifications(mut self, notifications: Arc<NotificationDispatcher>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Run one bulk auto-update pass: every container with `update_available`
    /// set in stable id order, minus the labelled and setting-excluded ones.
    pub async fn run(&self) -> ImagesResult<AutoUpdateSummary> {
        let pending = {
            let conn = self.db.conn().await;
            self.db.image_updates.all_pending(&conn)?
        };

        let excluded: std::collections::HashSet<String> = self
            .settings
            .get_or("auto_update.excluded_containers", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut summary = AutoUpdateSummary::default();

        for record in pending {
            if excluded.contains(&record.container_id) {
                info!("auto-update skipped excluded container {}", record.container_id);
                continue;
            }

            let inspect = match self.dispatcher.inspect(&record.environment_id, &record.container_id).await {
                Ok(inspect) => inspect,
                Err(e) => {
                    summary.failed += 1;
                    summary.items.push(AutoUpdateItem { container_id: record.container_id.clone(), status: "failed".to_string(), error: Some(e.to_string()) });
                    continue;
                }
            };

            let updater_label = inspect
                .config
                .as_ref()
                .and_then(|c| c.labels.as_ref())
                .and_then(|l| l.get(LABEL_ARCANE_UPDATER))
                .cloned();
            if let Some(value) = updater_label {
                if is_falsy_label(&value) {
                    info!("auto-update skipped {} (updater label opted out)", record.container_id);
                    continue;
                }
            }

            match self.executor.apply(&record.environment_id, &record.container_id, None, AUTO_UPDATE_USER).await {
                Ok(UpdateOutcome::Updated { new_container_id }) => {
                    summary.updated += 1;
                    summary.items.push(AutoUpdateItem { container_id: new_container_id, status: "updated".to_string(), error: None });
                }
                Ok(UpdateOutcome::DelegatedSelfUpgrade) => {
                    summary.updated += 1;
                    summary.items.push(AutoUpdateItem { container_id: record.container_id.clone(), status: "delegated".to_string(), error: None });
                }
                Ok(UpdateOutcome::RolledBack { error }) => {
                    summary.failed += 1;
                    summary.items.push(AutoUpdateItem { container_id: record.container_id.clone(), status: "rolled_back".to_string(), error: Some(error) });
                }
                Err(e) => {
                    warn!("auto-update failed for {}: {}", record.container_id, e);
                    summary.failed += 1;
                    summary.items.push(AutoUpdateItem { container_id: record.container_id.clone(), status: "failed".to_string(), error: Some(e.to_string()) });
                }
            }
        }

        info!("auto-update pass complete: {} updated, {} failed", summary.updated, summary.failed);

        if summary.updated > 0 {
            if let Some(notifications) = &self.notifications {
                let updated_ids: Vec<String> = summary.items.iter().filter(|i| i.status == "updated" || i.status == "delegated").map(|i| i.container_id.clone()).collect();
                notifications.send_batched_image_update(&batched_image_update_payload(summary.updated, &updated_ids)).await;
            }
        }

        Ok(summary)
    }
}
