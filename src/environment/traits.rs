//! Shared error type for environment operations

/// Error type for environment operations
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Container not running")]
    NotRunning,

    #[error("Container already running")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image pull failed: {0}")]
    ImagePull(String),

    #[error("Attach failed: {0}")]
    AttachFailed(String),

    #[error("{0}")]
    Other(String),
}

pub type EnvironmentResult<T> = Result<T, EnvironmentError>;
