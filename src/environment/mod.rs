//! Environment abstraction module
//!
//! Provides a trait-based abstraction over container runtimes (Docker) plus
//! the Environment Registry and Docker Gateway that sit on top of it: the
//! registry tracks which Docker hosts are under management, the gateway
//! performs the actual container operations against one of them.

mod gateway;
mod registry;
mod traits;

pub use gateway::{ContainerSpec, DockerGateway};
pub use registry::{Registry, RegistryError, RegistryResult};
pub use traits::{EnvironmentError, EnvironmentResult};
