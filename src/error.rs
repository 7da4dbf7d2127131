//! Top-level error type shared across the control plane.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy from the error-handling design: not-found, validation,
/// conflict, upstream-transient, upstream-fatal, partial-failure and
/// corruption-risk all map onto a variant here so the HTTP layer can pick
/// the right status code without re-deriving the classification per call site.
#[derive(Error, Debug)]
pub enum ArcaneError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamTransient(String),

    #[error("upstream error: {0}")]
    UpstreamFatal(String),

    #[error("partial failure: {0}")]
    PartialFailure(String),

    #[error("restore failed (volume may be partially wiped): {0}")]
    CorruptionRisk(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ArcaneError>;

impl ArcaneError {
    /// Whether a caller (scheduled job, auto-update pass) should treat this
    /// as transient and simply retry on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArcaneError::UpstreamTransient(_) | ArcaneError::Docker(_)
        )
    }
}

impl From<crate::database::DatabaseError> for ArcaneError {
    fn from(e: crate::database::DatabaseError) -> Self {
        match e {
            crate::database::DatabaseError::NotFound(msg) => ArcaneError::NotFound(msg),
            other => ArcaneError::Internal(other.to_string()),
        }
    }
}

impl From<crate::environment::RegistryError> for ArcaneError {
    fn from(e: crate::environment::RegistryError) -> Self {
        use crate::environment::RegistryError;
        match e {
            RegistryError::NotFound(msg) => ArcaneError::NotFound(msg),
            RegistryError::AlreadyExists(msg) => ArcaneError::Conflict(msg),
            RegistryError::Pairing(msg) => ArcaneError::UpstreamFatal(msg),
            RegistryError::ConnectionTest(e) => ArcaneError::UpstreamTransient(e.to_string()),
            RegistryError::Database(e) => e.into(),
            RegistryError::Environment(e) => ArcaneError::Internal(e.to_string()),
        }
    }
}

impl From<crate::environment::EnvironmentError> for ArcaneError {
    fn from(e: crate::environment::EnvironmentError) -> Self {
        use crate::environment::EnvironmentError;
        match e {
            EnvironmentError::Docker(e) => ArcaneError::Docker(e),
            EnvironmentError::ContainerNotFound(msg) => ArcaneError::NotFound(msg),
            EnvironmentError::ContainerExists(msg) => ArcaneError::Conflict(msg),
            EnvironmentError::NotRunning => ArcaneError::Conflict("container not running".to_string()),
            EnvironmentError::AlreadyRunning => ArcaneError::Conflict("container already running".to_string()),
            EnvironmentError::Cancelled => ArcaneError::UpstreamTransient("operation cancelled".to_string()),
            EnvironmentError::Timeout => ArcaneError::UpstreamTransient("operation timed out".to_string()),
            EnvironmentError::Io(e) => ArcaneError::Io(e),
            EnvironmentError::ImagePull(msg) => ArcaneError::UpstreamFatal(msg),
            EnvironmentError::AttachFailed(msg) => ArcaneError::UpstreamFatal(msg),
            EnvironmentError::Other(msg) => ArcaneError::Internal(msg),
        }
    }
}

impl From<crate::crypto::CryptoError> for ArcaneError {
    fn from(e: crate::crypto::CryptoError) -> Self {
        ArcaneError::Internal(e.to_string())
    }
}

impl From<crate::dispatch::DispatchError> for ArcaneError {
    fn from(e: crate::dispatch::DispatchError) -> Self {
        use crate::dispatch::{AgentError, DispatchError};
        match e {
            DispatchError::Registry(e) => e.into(),
            DispatchError::Agent(agent_err) => match &agent_err {
                AgentError::Server { status, message } if *status == 404 => ArcaneError::NotFound(message.clone()),
                _ if agent_err.is_retryable() => ArcaneError::UpstreamTransient(agent_err.to_string()),
                _ => ArcaneError::UpstreamFatal(agent_err.to_string()),
            },
        }
    }
}

impl From<crate::images::ImagesError> for ArcaneError {
    fn from(e: crate::images::ImagesError) -> Self {
        use crate::images::ImagesError;
        match e {
            ImagesError::NoImage(msg) => ArcaneError::Validation(msg),
            ImagesError::SelfUpgradeUnavailable => ArcaneError::Conflict(e.to_string()),
            ImagesError::Database(e) => e.into(),
            ImagesError::Dispatch(e) => e.into(),
        }
    }
}

impl From<crate::volumes::VolumesError> for ArcaneError {
    fn from(e: crate::volumes::VolumesError) -> Self {
        use crate::volumes::VolumesError;
        match e {
            VolumesError::NotFound(msg) => ArcaneError::NotFound(msg),
            VolumesError::Locked(msg) => ArcaneError::Conflict(msg),
            VolumesError::VolumeInUse(msg) => ArcaneError::Conflict(msg),
            VolumesError::PartialRestore(msg) => ArcaneError::CorruptionRisk(msg),
            VolumesError::Path(e) => ArcaneError::Validation(e.to_string()),
            VolumesError::CommandFailed(code, msg) => ArcaneError::UpstreamFatal(format!("exit code {code}: {msg}")),
            VolumesError::Database(e) => e.into(),
            VolumesError::Dispatch(e) => e.into(),
        }
    }
}

impl From<crate::gitops::GitOpsError> for ArcaneError {
    fn from(e: crate::gitops::GitOpsError) -> Self {
        use crate::gitops::GitOpsError;
        match e {
            GitOpsError::NotFound(msg) => ArcaneError::NotFound(msg),
            GitOpsError::ComposeMissing(path) => ArcaneError::Validation(format!("compose file missing: {}", path.display())),
            GitOpsError::Git(msg) | GitOpsError::Redeploy(msg) => ArcaneError::UpstreamFatal(msg),
            GitOpsError::Database(e) => e.into(),
            GitOpsError::Io(e) => ArcaneError::Internal(e.to_string()),
        }
    }
}

impl From<crate::settings::SettingsError> for ArcaneError {
    fn from(e: crate::settings::SettingsError) -> Self {
        use crate::settings::SettingsError;
        match e {
            SettingsError::InvalidCron { .. } => ArcaneError::Validation(e.to_string()),
            SettingsError::Database(e) => e.into(),
        }
    }
}

impl From<crate::cron::SchedulerError> for ArcaneError {
    fn from(e: crate::cron::SchedulerError) -> Self {
        use crate::cron::SchedulerError;
        match e {
            SchedulerError::JobNotFound(msg) => ArcaneError::NotFound(msg),
            SchedulerError::JobExists(msg) => ArcaneError::Conflict(msg),
            other => ArcaneError::Validation(other.to_string()),
        }
    }
}

impl IntoResponse for ArcaneError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ArcaneError::Docker(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ArcaneError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ArcaneError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ArcaneError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ArcaneError::UpstreamTransient(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ArcaneError::UpstreamFatal(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ArcaneError::PartialFailure(msg) => (StatusCode::MULTI_STATUS, msg.clone()),
            ArcaneError::CorruptionRisk(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ArcaneError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ArcaneError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ArcaneError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ArcaneError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": true,
            "message": message,
        }));

        (status, body).into_response()
    }
}
