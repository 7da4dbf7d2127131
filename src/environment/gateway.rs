//! Docker gateway
//!
//! Wraps a single `bollard::Docker` client with the container operations the
//! control plane needs: list, inspect, create, power actions, exec (used by
//! the volume backup engine instead of shelling out to the host's own `tar`)
//! and image pulls with streamed progress. One gateway exists per local or
//! paired-remote environment; `registry::Registry` owns the map from
//! environment id to gateway.

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, Stats as BollardStats, StatsOptions, StopContainerOptions,
};
use bollard::auth::DockerCredentials;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::traits::{EnvironmentError, EnvironmentResult};

/// Everything needed to (re)create a container, independent of whatever is
/// currently running under that name.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub port_bindings: HashMap<String, Vec<(String, String)>>,
    pub binds: Vec<String>,
    pub network: Option<String>,
    pub memory_bytes: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub restart_policy: Option<String>,
}

pub struct DockerGateway {
    client: Docker,
}

impl DockerGateway {
    pub fn connect_local() -> EnvironmentResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(EnvironmentError::Docker)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Docker) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Docker {
        &self.client
    }

    /// Cheap connectivity probe, used by the Environment Registry's
    /// heartbeat job to flip an environment between online/offline.
    pub async fn ping(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    pub async fn list_containers(&self, all: bool) -> EnvironmentResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        self.client
            .list_containers(Some(options))
            .await
            .map_err(EnvironmentError::Docker)
    }

    pub async fn inspect(&self, id: &str) -> EnvironmentResult<bollard::models::ContainerInspectResponse> {
        self.client
            .inspect_container(id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    EnvironmentError::ContainerNotFound(id.to_string())
                }
                other => EnvironmentError::Docker(other),
            })
    }

    pub async fn exists(&self, id: &str) -> EnvironmentResult<bool> {
        match self.inspect(id).await {
            Ok(_) => Ok(true),
            Err(EnvironmentError::ContainerNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, spec: &ContainerSpec) -> EnvironmentResult<String> {
        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            network_mode: spec.network.clone(),
            memory: spec.memory_bytes,
            cpu_quota: spec.cpu_quota,
            port_bindings: Some(
                spec.port_bindings
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            Some(
                                v.iter()
                                    .map(|(ip, port)| bollard::models::PortBinding {
                                        host_ip: Some(ip.clone()),
                                        host_port: Some(port.clone()),
                                    })
                                    .collect(),
                            ),
                        )
                    })
                    .collect(),
            ),
            restart_policy: spec.restart_policy.as_ref().map(|policy| bollard::models::RestartPolicy {
                name: match policy.as_str() {
                    "always" => Some(bollard::models::RestartPolicyNameEnum::ALWAYS),
                    "unless-stopped" => Some(bollard::models::RestartPolicyNameEnum::UNLESS_STOPPED),
                    "on-failure" => Some(bollard::models::RestartPolicyNameEnum::ON_FAILURE),
                    _ => Some(bollard::models::RestartPolicyNameEnum::NO),
                },
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(EnvironmentError::Docker)?;

        info!("created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    pub async fn start(&self, id: &str) -> EnvironmentResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(EnvironmentError::Docker)
    }

    pub async fn stop(&self, id: &str, timeout_secs: i64) -> EnvironmentResult<()> {
        let options = StopContainerOptions { t: timeout_secs };
        self.client
            .stop_container(id, Some(options))
            .await
            .map_err(EnvironmentError::Docker)
    }

    pub async fn restart(&self, id: &str, timeout_secs: i64) -> EnvironmentResult<()> {
        self.client
            .restart_container(id, Some(bollard::container::RestartContainerOptions { t: timeout_secs as isize }))
            .await
            .map_err(EnvironmentError::Docker)
    }

    /// Rename a container, used by the Container Update Executor to free up
    /// the original name for a replacement when the stopped original is
    /// still holding it (spec step 4).
    pub async fn rename(&self, id: &str, new_name: &str) -> EnvironmentResult<()> {
        self.client
            .rename_container(id, bollard::container::RenameContainerOptions { name: new_name })
            .await
            .map_err(EnvironmentError::Docker)
    }

    /// `volumes` removes the container's anonymous volumes too; the update
    /// executor passes `false` so the old container's volumes survive the
    /// recreate (step 6).
    pub async fn remove(&self, id: &str, force: bool, volumes: bool) -> EnvironmentResult<()> {
        let options = RemoveContainerOptions {
            force,
            v: volumes,
            ..Default::default()
        };
        match self.client.remove_container(id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(EnvironmentError::Docker(e)),
        }
    }

    /// Pull an image, logging progress lines as they stream in. Used both by
    /// the manual "update now" action and the Image Update Engine's poller.
    /// `credentials` carries a matched registry credential for a private
    /// pull; `None` pulls anonymously.
    pub async fn pull_image(&self, image: &str, credentials: Option<DockerCredentials>) -> EnvironmentResult<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    warn!("image pull failed for {}: {}", image, e);
                    return Err(EnvironmentError::ImagePull(e.to_string()));
                }
            }
        }
        Ok(())
    }

    pub async fn stats_once(&self, id: &str) -> EnvironmentResult<BollardStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.client.stats(id, Some(options));
        stream
            .next()
            .await
            .ok_or_else(|| EnvironmentError::Other("no stats sample returned".into()))?
            .map_err(EnvironmentError::Docker)
    }

    /// Run a command inside the container and collect its combined output.
    /// The volume backup engine uses this to invoke `tar` inside the
    /// container's own filesystem namespace rather than reaching into the
    /// host's view of the volume directly.
    pub async fn exec(&self, id: &str, cmd: Vec<String>) -> EnvironmentResult<(i64, Vec<u8>)> {
        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(EnvironmentError::Docker)?;

        let mut output = Vec::new();
        if let StartExecResults::Attached { mut output: stream, .. } = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(EnvironmentError::Docker)?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(log) => output.extend_from_slice(&log.into_bytes()),
                    Err(e) => return Err(EnvironmentError::Docker(e)),
                }
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await.map_err(EnvironmentError::Docker)?;
        let exit_code = inspect.exit_code.unwrap_or(0);
        Ok((exit_code, output))
    }

    /// Start a short-lived, networkless helper container with `volume_name`
    /// mounted read-only at `/volume`, used by the Volume Browser and Backup
    /// engine to run `find`/`stat`/`tar` against a volume's contents without
    /// attaching to whatever container is actually using it. Removed
    /// automatically on exit.
    pub async fn create_helper(&self, volume_name: &str, read_only: bool) -> EnvironmentResult<String> {
        let mount = format!("{volume_name}:/volume:{}", if read_only { "ro" } else { "rw" });
        self.create_helper_with_binds(vec![mount]).await
    }

    /// Like [`create_helper`](Self::create_helper) but mounts an arbitrary
    /// set of `docker run -v`-style bind strings, used when the backup
    /// engine needs both the source volume and the archive store volume
    /// attached to the same helper.
    pub async fn create_helper_with_binds(&self, binds: Vec<String>) -> EnvironmentResult<String> {
        let helper_image = self.resolve_helper_image().await;

        let options = CreateContainerOptions { name: String::new(), platform: None };

        let host_config = HostConfig {
            binds: Some(binds),
            network_mode: Some("none".to_string()),
            auto_remove: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(helper_image),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(HashMap::from([("com.getarcaneapp.arcane-internal".to_string(), "true".to_string())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self.client.create_container(Some(options), config).await.map_err(EnvironmentError::Docker)?;
        self.start(&response.id).await?;
        Ok(response.id)
    }

    /// Pick the image a pooled helper container runs: Arcane's own image
    /// first (it's already present on every environment running Arcane and
    /// carries `find`/`tar`/`sh`), then a `busybox:stable-musl` already
    /// present locally, and only as a last resort a freshly pulled
    /// `busybox:stable-musl`.
    async fn resolve_helper_image(&self) -> String {
        const FALLBACK_IMAGE: &str = "busybox:stable-musl";

        if let Some(image) = self.own_image().await {
            return image;
        }

        if self.image_present(FALLBACK_IMAGE).await {
            return FALLBACK_IMAGE.to_string();
        }

        if let Err(e) = self.pull_image(FALLBACK_IMAGE, None).await {
            debug!("helper image pull failed, continuing anyway: {}", e);
        }
        FALLBACK_IMAGE.to_string()
    }

    /// Identify Arcane's own image by inspecting the container this process
    /// is itself running in. Docker sets a container's hostname to its own
    /// short id by default, so `/etc/hostname` doubles as a self-lookup key.
    /// Returns `None` outside a container (bare-metal/dev runs), where
    /// there's no "own image" to use.
    async fn own_image(&self) -> Option<String> {
        let own_id = self_container_id()?;
        match self.inspect(&own_id).await {
            Ok(inspect) => inspect.image,
            Err(_) => None,
        }
    }

    async fn image_present(&self, image: &str) -> bool {
        self.client.inspect_image(image).await.is_ok()
    }

    pub async fn logs(&self, id: &str, tail: u32) -> EnvironmentResult<Vec<String>> {
        use bollard::container::LogsOptions;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            timestamps: true,
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(options));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    let line = output.to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                Err(e) => {
                    warn!("error reading logs for {}: {}", id, e);
                    break;
                }
            }
        }
        Ok(lines)
    }
}

/// The short container id Docker stamps as this process's own hostname, or
/// `None` when not running inside a container at all.
fn self_container_id() -> Option<String> {
    let hostname = std::fs::read_to_string("/etc/hostname").ok()?;
    let hostname = hostname.trim();
    (!hostname.is_empty()).then(|| hostname.to_string())
}
