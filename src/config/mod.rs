//! Configuration management module
//!
//! TOML-based process configuration: boot mode (manager/agent), API bind
//! address and TLS, system paths, local Docker socket settings, and the
//! agent dispatch token/timeouts.

mod config;

pub use config::*;
