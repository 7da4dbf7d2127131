//! Event bus for pub/sub messaging
//!
//! Provides a broadcast mechanism for container state changes, image update
//! detection, backup/restore progress and GitOps sync results. Every event
//! published here is also durably appended by `events::Log` so a client that
//! wasn't subscribed at the time can still page through history.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Severity of an [`Event`], carried through to the durable log and used by
/// the Notification Dispatcher to decide whether a channel's subscription
/// applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle state of a managed container, mirrored from Docker's own state
/// machine onto the subset Arcane cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Offline,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Offline => write!(f, "offline"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Offline
    }
}

/// Network statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Resource statistics for a container, as sampled from Docker's stats stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    /// CPU usage as absolute percentage (100 = 1 core)
    pub cpu_absolute: f64,
    pub network: NetworkStats,
    pub uptime: i64,
}

/// Events that can be published through the event bus. `environment_id` and
/// `container_id` are carried on the events that concern a specific
/// container rather than threaded through a second channel per container.
#[derive(Debug, Clone)]
pub enum Event {
    ContainerStateChanged {
        environment_id: String,
        container_id: String,
        state: ProcessState,
    },

    ContainerStats {
        environment_id: String,
        container_id: String,
        stats: Stats,
    },

    ContainerLog {
        container_id: String,
        line: Vec<u8>,
    },

    EnvironmentStatusChanged {
        environment_id: String,
        online: bool,
    },

    ImageUpdateAvailable {
        environment_id: String,
        container_id: String,
        image: String,
    },

    ImageUpdateApplied {
        environment_id: String,
        container_id: String,
        successful: bool,
    },

    BackupStarted {
        backup_id: String,
        container_id: String,
    },

    BackupCompleted {
        backup_id: String,
        successful: bool,
        checksum: Option<String>,
        size: u64,
    },

    RestoreStarted {
        backup_id: String,
        container_id: String,
    },

    RestoreCompleted {
        backup_id: String,
        successful: bool,
    },

    GitOpsSyncStarted {
        target_id: String,
    },

    GitOpsSyncCompleted {
        target_id: String,
        successful: bool,
        applied_hash: Option<String>,
    },

    /// Recorded when a container update rolls back after a failed recreate
    /// (§4.7 step 5) or when any other primary operation against a container
    /// fails outright.
    ContainerError {
        environment_id: String,
        container_id: String,
        message: String,
    },

    VulnerabilityFound {
        environment_id: String,
        container_id: String,
        image: String,
        severity_count: u32,
    },

    PruneCompleted {
        environment_id: String,
        reclaimed_bytes: u64,
    },
}

impl Event {
    /// Severity used for the durable log row and for notification routing.
    pub fn severity(&self) -> Severity {
        match self {
            Event::ImageUpdateApplied { successful, .. } => if *successful { Severity::Success } else { Severity::Error },
            Event::BackupCompleted { successful, .. } => if *successful { Severity::Success } else { Severity::Error },
            Event::RestoreCompleted { successful, .. } => if *successful { Severity::Success } else { Severity::Error },
            Event::GitOpsSyncCompleted { successful, .. } => if *successful { Severity::Success } else { Severity::Error },
            Event::ContainerError { .. } => Severity::Error,
            Event::VulnerabilityFound { .. } => Severity::Warning,
            Event::ImageUpdateAvailable { .. } => Severity::Info,
            Event::EnvironmentStatusChanged { online, .. } => if *online { Severity::Info } else { Severity::Warning },
            _ => Severity::Info,
        }
    }
}

/// Event bus for broadcasting events to multiple subscribers
///
/// Uses tokio broadcast channels for efficient pub/sub messaging.
/// Subscribers that fall behind will lose messages (lagged).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    // Keep a receiver to prevent the channel from closing
    _receiver: broadcast::Receiver<Event>,
}

impl EventBus {
    /// Create a new event bus with default capacity (4096 events)
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender, _receiver }
    }

    /// Subscribe to the event bus
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Returns the number of receivers
    /// that received it; ignores the "no receivers" error since the durable
    /// log is the source of truth, not the live fan-out.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn publish_state(&self, environment_id: &str, container_id: &str, state: ProcessState) -> usize {
        let receivers = self.publish(Event::ContainerStateChanged {
            environment_id: environment_id.to_string(),
            container_id: container_id.to_string(),
            state,
        });
        debug!("published ContainerStateChanged({}) for {} to {} receivers", state, container_id, receivers);
        receivers
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            _receiver: self.sender.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_pubsub() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_state("0", "abc123", ProcessState::Running);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ContainerStateChanged { state: ProcessState::Running, .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_state("0", "abc123", ProcessState::Starting);

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();

        assert!(matches!(event1, Event::ContainerStateChanged { state: ProcessState::Starting, .. }));
        assert!(matches!(event2, Event::ContainerStateChanged { state: ProcessState::Starting, .. }));
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let _rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_process_state_display() {
        assert_eq!(ProcessState::Offline.to_string(), "offline");
        assert_eq!(ProcessState::Running.to_string(), "running");
    }
}
