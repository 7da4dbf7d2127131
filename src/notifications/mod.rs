//! Notification Dispatcher
//!
//! Fans a domain event out to every enabled channel subscribed to its kind.
//! Each send runs independently with its own deadline; one provider failing
//! never blocks another, the same "collect per-item outcomes, never abort
//! the batch" shape used by the Auto-update Orchestrator.

mod providers;

pub use providers::{NotificationError, NotificationPayload, NotificationResult, ProviderKind};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::database::{Database, NotificationChannel};
use crate::events::{Event, Severity};

/// The four event families the dispatcher routes on, independent of the
/// finer-grained kinds the durable event log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ImageUpdate,
    ContainerUpdate,
    VulnerabilityFound,
    PruneReport,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ImageUpdate => "imageUpdate",
            NotificationKind::ContainerUpdate => "containerUpdate",
            NotificationKind::VulnerabilityFound => "vulnerabilityFound",
            NotificationKind::PruneReport => "pruneReport",
        }
    }

    /// Events outside these four families (container state changes, log
    /// lines, gitops progress) never reach the dispatcher.
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::ImageUpdateAvailable { .. } | Event::ImageUpdateApplied { .. } => Some(NotificationKind::ImageUpdate),
            Event::ContainerError { .. } => Some(NotificationKind::ContainerUpdate),
            Event::VulnerabilityFound { .. } => Some(NotificationKind::VulnerabilityFound),
            Event::PruneCompleted { .. } => Some(NotificationKind::PruneReport),
            _ => None,
        }
    }
}

fn render(event: &Event) -> (String, String) {
    match event {
        Event::ImageUpdateAvailable { image, container_id, .. } => {
            ("Container Image Update Available".to_string(), format!("{container_id} has an update available for {image}"))
        }
        Event::ImageUpdateApplied { container_id, successful, .. } => {
            let title = if *successful { "Container Image Updated" } else { "Container Image Update Failed" };
            (title.to_string(), format!("{container_id}: {title}"))
        }
        Event::ContainerError { container_id, message, .. } => ("Container Error".to_string(), format!("{container_id}: {message}")),
        Event::VulnerabilityFound { image, severity_count, .. } => {
            ("Vulnerabilities Found".to_string(), format!("{severity_count} vulnerabilities found in {image}"))
        }
        Event::PruneCompleted { reclaimed_bytes, .. } => ("Prune Completed".to_string(), format!("reclaimed {reclaimed_bytes} bytes")),
        _ => ("Arcane Notification".to_string(), String::new()),
    }
}

/// Title/body for the batched auto-update summary, per the template
/// contract: one title for N updates rather than N separate notifications.
pub fn batched_image_update_payload(updated: u32, items: &[String]) -> NotificationPayload {
    NotificationPayload {
        title: format!("{updated} Container Image Update(s) Available"),
        body: if items.is_empty() { "no containers were updated".to_string() } else { items.join(", ") },
        severity: Severity::Info,
    }
}

pub struct NotificationDispatcher {
    db: Arc<Database>,
    http: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        let http = reqwest::Client::builder().build().expect("notification http client configuration is valid");
        Self { db, http }
    }

    /// Dispatch a single domain event to every enabled, subscribed channel.
    /// Events outside the four notifiable families are silently dropped.
    pub async fn dispatch(&self, event: &Event) {
        let Some(kind) = NotificationKind::from_event(event) else { return };
        let (title, body) = render(event);
        let payload = NotificationPayload { title, body, severity: event.severity() };
        self.send_to_subscribers(kind, &payload).await;
    }

    pub async fn send_batched_image_update(&self, payload: &NotificationPayload) {
        self.send_to_subscribers(NotificationKind::ImageUpdate, payload).await;
    }

    async fn send_to_subscribers(&self, kind: NotificationKind, payload: &NotificationPayload) {
        let channels = {
            let conn = self.db.conn().await;
            match self.db.notification_channels.enabled(&conn) {
                Ok(c) => c,
                Err(e) => {
                    warn!("failed to load notification channels: {}", e);
                    return;
                }
            }
        };

        let subscribed: Vec<NotificationChannel> = channels
            .into_iter()
            .filter(|c| c.events.is_empty() || c.events.iter().any(|e| e == kind.as_str()))
            .collect();

        if subscribed.is_empty() {
            return;
        }

        let sends = subscribed.into_iter().map(|channel| {
            let payload = payload.clone();
            let http = self.http.clone();
            async move {
                let Ok(provider) = ProviderKind::from_str(&channel.provider) else {
                    warn!("unknown notification provider {} for channel {}", channel.provider, channel.id);
                    return;
                };
                let deadline = provider.send_deadline();
                match tokio::time::timeout(deadline, provider.send(&http, &channel.config, &payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("notification send failed for channel {} ({}): {}", channel.id, channel.provider, e),
                    Err(_) => warn!("notification send timed out for channel {} ({}) after {:?}", channel.id, channel.provider, deadline),
                }
            }
        });

        futures_util::future::join_all(sends).await;
    }
}

/// Per-send timeout floor/ceiling from the concurrency model: 10-30s
/// depending on transport.
pub const MIN_SEND_DEADLINE: Duration = Duration::from_secs(10);
pub const MAX_SEND_DEADLINE: Duration = Duration::from_secs(30);
