//! Request/response shapes for the manager-facing `/api/*` surface.
//!
//! `environment::ContainerSpec` carries no `Deserialize` impl of its own, so
//! anything accepting a container body defines its own request struct here
//! and converts it by hand, the same split the teacher keeps between its
//! wire DTOs and the domain types they build.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::environment::ContainerSpec;

#[derive(Debug, Deserialize)]
pub struct ContainerCreateRequest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub memory_bytes: Option<i64>,
    #[serde(default)]
    pub cpu_quota: Option<i64>,
    #[serde(default)]
    pub restart_policy: Option<String>,
}

impl From<ContainerCreateRequest> for ContainerSpec {
    fn from(req: ContainerCreateRequest) -> Self {
        ContainerSpec {
            name: req.name,
            image: req.image,
            env: req.env,
            labels: req.labels,
            port_bindings: HashMap::new(),
            binds: req.binds,
            network: req.network,
            memory_bytes: req.memory_bytes,
            cpu_quota: req.cpu_quota,
            restart_policy: req.restart_policy,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerDeleteRequest {
    #[serde(default)]
    pub force: bool,
    /// Remove the container's anonymous volumes too.
    #[serde(default)]
    pub volumes: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerUpdateRequest {
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterEnvironmentRequest {
    pub id: String,
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub agent_url: String,
}

fn default_kind() -> String {
    "agent".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub agent_url: String,
    pub bootstrap_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegistryCredentialRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub registry_host: String,
    pub username: String,
    /// Plaintext on the wire; encrypted via the process `Vault` before it
    /// reaches `RegistryCredentialStore`.
    pub token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Deserialize)]
pub struct NotificationChannelRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub provider: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitOpsTargetRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub environment_id: String,
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub project_name: String,
    pub compose_path: String,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct VolumeBackupCreateRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VolumeRestoreRequest {
    /// Restore only these paths when set, a full restore otherwise.
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiMessage {
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }
}
