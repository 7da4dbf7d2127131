//! Event system module
//!
//! Provides a pub/sub event bus for broadcasting container state changes,
//! stats updates and maintenance-job progress, plus the durable log that
//! wraps it with persistence.

mod bus;
mod log;

pub use bus::{Event, EventBus, NetworkStats, ProcessState, Severity, Stats};
pub use log::Log;
