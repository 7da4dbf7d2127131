//! Arcane control plane library
//!
//! Mediates between operators and one-or-more Docker daemons: a
//! multi-environment dispatcher, a cron-driven job scheduler, an image
//! update engine, a container update executor, a volume browser/backup
//! engine, a notification dispatcher, a GitOps sync engine and the
//! event-sourced audit log tying them together.

pub mod cmd;
pub mod config;
pub mod crypto;
pub mod cron;
pub mod database;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod events;
pub mod gitops;
pub mod images;
pub mod notifications;
pub mod router;
pub mod settings;
pub mod volumes;

pub use config::Configuration;
pub use error::{ArcaneError, Result};
pub use events::EventBus;
