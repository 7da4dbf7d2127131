//! Dispatcher
//!
//! Routes every container operation addressed at an environment either to
//! the local [`DockerGateway`] (environment id [`LOCAL_ENVIRONMENT_ID`], or
//! when this process is itself running in agent mode) or to a remote agent
//! over HTTP, the way `router::AppState` fans requests out to
//! `docker::service` in the teacher and `api::client::HttpClient` talks to
//! the panel.

mod agent_client;

pub use agent_client::{AgentClient, AgentError, AgentResult};

use std::sync::Arc;
use std::time::Duration;

use bollard::models::{ContainerInspectResponse, ContainerSummary};
use tracing::debug;

use crate::config::AgentConfiguration;
use crate::database::LOCAL_ENVIRONMENT_ID;
use crate::environment::{ContainerSpec, Registry};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("environment error: {0}")]
    Registry(#[from] crate::environment::RegistryError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Destination an operation was actually routed to, useful for event/log
/// metadata and for tests asserting routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Agent,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    config: AgentConfiguration,
    /// True when this process is itself running as an agent: all operations
    /// are forced local regardless of the target environment id, since an
    /// agent only ever manages its own Docker daemon.
    agent_mode: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, config: AgentConfiguration, agent_mode: bool) -> Self {
        Self { registry, config, agent_mode }
    }

    async fn route(&self, environment_id: &str) -> DispatchResult<Route> {
        if self.agent_mode || environment_id == LOCAL_ENVIRONMENT_ID {
            return Ok(Route::Local);
        }
        let env = self.registry.get(environment_id).await?;
        Ok(if env.is_local() { Route::Local } else { Route::Agent })
    }

    fn agent_client(&self, agent_url: &str, agent_token: &str) -> AgentClient {
        AgentClient::new(agent_url, agent_token, Duration::from_secs(self.config.dispatch_timeout_secs))
    }

    pub async fn list_containers(&self, environment_id: &str, all: bool) -> DispatchResult<Vec<ContainerSummary>> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.list_containers(all).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .list_containers(all)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn inspect(&self, environment_id: &str, container_id: &str) -> DispatchResult<ContainerInspectResponse> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.inspect(container_id).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .inspect(container_id)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn create(&self, environment_id: &str, spec: &ContainerSpec) -> DispatchResult<String> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.create(spec).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .create(spec)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn start(&self, environment_id: &str, container_id: &str) -> DispatchResult<()> {
        debug!("dispatch start {}/{}", environment_id, container_id);
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.start(container_id).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .start(container_id)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn stop(&self, environment_id: &str, container_id: &str, timeout_secs: i64) -> DispatchResult<()> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.stop(container_id, timeout_secs).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .stop(container_id, timeout_secs)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn restart(&self, environment_id: &str, container_id: &str, timeout_secs: i64) -> DispatchResult<()> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.restart(container_id, timeout_secs).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .restart(container_id, timeout_secs)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn rename(&self, environment_id: &str, container_id: &str, new_name: &str) -> DispatchResult<()> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.rename(container_id, new_name).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .rename(container_id, new_name)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// `volumes` removes the container's anonymous volumes too; pass `false`
    /// to preserve them (the update executor's post-recreate cleanup).
    pub async fn remove(&self, environment_id: &str, container_id: &str, force: bool, volumes: bool) -> DispatchResult<()> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.remove(container_id, force, volumes).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .remove(container_id, force, volumes)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// `credentials` is a matched `(username, password)` for a private
    /// registry; `None` pulls anonymously.
    pub async fn pull_image(&self, environment_id: &str, image: &str, credentials: Option<(String, String)>) -> DispatchResult<()> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                let docker_credentials = credentials.map(|(username, password)| bollard::auth::DockerCredentials {
                    username: Some(username),
                    password: Some(password),
                    ..Default::default()
                });
                Ok(gateway.pull_image(image, docker_credentials).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .pull_image(image, credentials)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    pub async fn exec(&self, environment_id: &str, container_id: &str, cmd: Vec<String>) -> DispatchResult<(i64, Vec<u8>)> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.exec(container_id, cmd).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => {
                let env = self.registry.get(environment_id).await?;
                self.agent_client(&env.agent_url, &env.agent_token)
                    .exec(container_id, cmd)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// Start a helper container bound to `volume_name`, used by the Volume
    /// Browser and Backup engine. Only supported against the local Docker
    /// daemon today — a remote agent would need its own helper-container
    /// endpoint, which the agent wire protocol doesn't expose yet.
    pub async fn create_helper(&self, environment_id: &str, volume_name: &str, read_only: bool) -> DispatchResult<String> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.create_helper(volume_name, read_only).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => Err(DispatchError::Agent(AgentError::Local(
                "helper containers are not yet supported over the agent wire protocol".to_string(),
            ))),
        }
    }

    /// Like [`create_helper`](Self::create_helper) but with explicit
    /// `docker run -v`-style bind strings, used by the backup engine to
    /// attach both the source volume and the archive store in one helper.
    pub async fn create_helper_with_binds(&self, environment_id: &str, binds: Vec<String>) -> DispatchResult<String> {
        match self.route(environment_id).await? {
            Route::Local => {
                let gateway = self.registry.gateway(environment_id).await?;
                Ok(gateway.create_helper_with_binds(binds).await.map_err(|e| AgentError::Local(e.to_string()))?)
            }
            Route::Agent => Err(DispatchError::Agent(AgentError::Local(
                "helper containers are not yet supported over the agent wire protocol".to_string(),
            ))),
        }
    }
}
