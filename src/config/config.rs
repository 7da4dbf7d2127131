//! Configuration structures and loading

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration, loaded once at startup and shared
/// read-only behind an `Arc` for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// Boot mode: manager (runs the full control plane) or agent
    /// (exposes only the local Docker Gateway over HTTP for a manager to
    /// dispatch to). Overridable via the `ARCANE_AGENT_MODE` env var.
    #[serde(default)]
    pub mode: BootMode,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// System paths and settings
    #[serde(default)]
    pub system: SystemConfiguration,

    /// Docker configuration for the local environment
    #[serde(default)]
    pub docker: DockerConfiguration,

    /// Agent dispatch configuration (used in manager mode to reach remote
    /// environments, and in agent mode to validate inbound bearer tokens)
    #[serde(default)]
    pub agent: AgentConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    #[default]
    Manager,
    Agent,
}

impl Configuration {
    /// Load configuration from a TOML file, then apply the `ARCANE_AGENT_MODE`
    /// environment override and resolve relative paths against the file's
    /// parent directory.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", path))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        if let Ok(mode) = std::env::var("ARCANE_AGENT_MODE") {
            if mode == "1" || mode.eq_ignore_ascii_case("true") {
                config.mode = BootMode::Agent;
            }
        }

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);

        std::fs::create_dir_all(&config.system.data_directory)?;
        std::fs::create_dir_all(&config.system.backup_directory)?;
        std::fs::create_dir_all(&config.system.tmp_directory)?;
        std::fs::create_dir_all(&config.system.log_directory)?;

        Ok(config)
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    #[serde(default)]
    pub ssl: SslConfiguration,

    #[serde(default = "default_upload_limit")]
    pub upload_limit: u64,

    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            ssl: SslConfiguration::default(),
            upload_limit: default_upload_limit(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8080
}

fn default_upload_limit() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// System paths and settings
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Where the sqlite database lives
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    /// Where volume backups are written (local adapter) or staged before
    /// upload (S3 adapter)
    #[serde(default = "default_backup_directory")]
    pub backup_directory: PathBuf,

    #[serde(default = "default_tmp_directory")]
    pub tmp_directory: PathBuf,

    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            backup_directory: default_backup_directory(),
            tmp_directory: default_tmp_directory(),
            log_directory: default_log_directory(),
            timezone: default_timezone(),
        }
    }
}

impl SystemConfiguration {
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
        self.backup_directory = Self::resolve_path(&self.backup_directory, base_dir);
        self.tmp_directory = Self::resolve_path(&self.tmp_directory, base_dir);
        self.log_directory = Self::resolve_path(&self.log_directory, base_dir);
    }

    fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            let resolved = base_dir.join(path);
            resolved
                .canonicalize()
                .unwrap_or_else(|_| Self::normalize_path(&resolved))
        }
    }

    fn normalize_path(path: &std::path::Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::ParentDir => {
                    components.pop();
                }
                std::path::Component::CurDir => {}
                c => components.push(c),
            }
        }
        components.iter().collect()
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_directory.join("arcane.db")
    }
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(".arcane/data")
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from(".arcane/backups")
}

fn default_tmp_directory() -> PathBuf {
    PathBuf::from(".arcane/tmp")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".arcane/logs")
}

fn default_timezone() -> String {
    "UTC".into()
}

/// Docker configuration for the environment this process manages directly
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    #[serde(default)]
    pub network: NetworkConfiguration,

    /// Per-container PID limit applied by the Docker Gateway
    #[serde(default = "default_container_pid_limit")]
    pub container_pid_limit: i64,

    /// DNS servers applied to created containers
    #[serde(default)]
    pub dns: Vec<String>,
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            network: NetworkConfiguration::default(),
            container_pid_limit: default_container_pid_limit(),
            dns: Vec::new(),
        }
    }
}

fn default_docker_socket() -> String {
    #[cfg(target_os = "windows")]
    {
        "npipe:////./pipe/docker_engine".into()
    }
    #[cfg(not(target_os = "windows"))]
    {
        "/var/run/docker.sock".into()
    }
}

fn default_container_pid_limit() -> i64 {
    512
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfiguration {
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default = "default_network_driver")]
    pub driver: String,
}

fn default_network_name() -> String {
    "bridge".into()
}

fn default_network_driver() -> String {
    "bridge".into()
}

/// Agent dispatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfiguration {
    /// Bearer token this process expects on inbound requests when running
    /// in agent mode. Per-environment tokens used when dispatching *to*
    /// remote agents live in the Environment Registry, not here.
    #[serde(default)]
    pub token: String,

    /// Default per-call deadline for remote agent dispatch
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Bootstrap token validity window for agent pairing
    #[serde(default = "default_pairing_ttl_secs")]
    pub pairing_ttl_secs: u64,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            token: String::new(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            pairing_ttl_secs: default_pairing_ttl_secs(),
        }
    }
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_pairing_ttl_secs() -> u64 {
    900
}

pub type OverrideMap = HashMap<String, u64>;
