//! Image Update Engine and Container Update Executor
//!
//! Polls registries for digest/tag drift on every container's image,
//! persists what it found via `database::images`, and (on request or via the
//! Auto-update Orchestrator) recreates a container in place against the new
//! image the same way `environment::gateway::DockerGateway::create` builds
//! one from scratch, just sourced from the container's own current config
//! instead of a caller-supplied spec.

pub mod autoupdate;
mod registry_client;

pub use registry_client::{is_stable_tag, ImageRef, RegistryClient, RegistryError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::crypto::Vault;
use crate::database::{Database, ImageUpdateRecord, RegistryCredential, UpdateType};
use crate::dispatch::Dispatcher;
use crate::environment::ContainerSpec;
use crate::events::{Event, Log};

#[derive(Debug, thiserror::Error)]
pub enum ImagesError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("container {0} has no image set")]
    NoImage(String),

    #[error("self-upgrade requires external CLI")]
    SelfUpgradeUnavailable,
}

pub type ImagesResult<T> = Result<T, ImagesError>;

/// Label identifying the Arcane container itself. A container bearing it
/// is never recreated in-process by the executor; see §4.7's self-upgrade
/// special case.
pub const LABEL_ARCANE_SELF: &str = "com.getarcaneapp.arcane";

/// Label opting a container out of the bulk auto-update orchestrator when
/// its value is falsy (`false|0|no|off`).
pub const LABEL_ARCANE_UPDATER: &str = "com.getarcaneapp.arcane.updater";

pub(crate) fn is_falsy_label(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off")
}

/// Resolve the enabled credential (if any) matching `registry_host`, with its
/// token decrypted. Shared by the digest-check poll and the update
/// executor's actual pull so both authenticate the same way against a
/// private registry.
async fn resolve_credential(db: &Database, vault: &Vault, registry_host: &str) -> (Option<RegistryCredential>, Option<(String, String)>) {
    let credential = {
        let conn = db.conn().await;
        match db.registry_credentials.for_host(&conn, registry_host) {
            Ok(c) => c,
            Err(e) => {
                warn!("could not look up registry credential for {}: {}", registry_host, e);
                None
            }
        }
    };

    let decrypted = match &credential {
        Some(c) => match vault.decrypt(&c.token) {
            Ok(token) => Some((c.username.clone(), token)),
            Err(e) => {
                warn!("could not decrypt credential for {}: {}", c.registry_host, e);
                None
            }
        },
        None => None,
    };

    (credential, decrypted)
}

/// Hands off a self-upgrade to a process outside the control plane, since
/// the executor cannot cleanly stop the container it is itself running in.
/// Absence of a wired implementation is a valid state — it just means a
/// self-upgrade attempt fails fast rather than corrupting the running
/// process.
pub trait SystemUpgrader: Send + Sync {
    fn trigger_upgrade_via_cli(&self, user: &str) -> Result<(), String>;
}

/// Outcome of [`ContainerUpdateExecutor::apply`].
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The container was recreated successfully under `new_container_id`.
    Updated { new_container_id: String },
    /// Self-upgrade was delegated to the external CLI; no container was
    /// touched directly by this process.
    DelegatedSelfUpgrade,
    /// Create/start failed after the old container was already stopped; the
    /// original was restarted and the update did not take effect.
    RolledBack { error: String },
}

/// Checks every running container's image against its registry and records
/// whether a newer digest or tag is available. Never pulls or recreates
/// anything itself — that's `ContainerUpdateExecutor`'s job, kept separate so
/// a poll can run on a tight cron cadence without touching running workloads.
pub struct ImageUpdateEngine {
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    registry_client: RegistryClient,
    vault: Arc<Vault>,
    log: Arc<Log>,
}

impl ImageUpdateEngine {
    pub fn new(db: Arc<Database>, dispatcher: Arc<Dispatcher>, vault: Arc<Vault>, log: Arc<Log>) -> Self {
        Self { db, dispatcher, registry_client: RegistryClient::new(), vault, log }
    }

    /// Poll every environment's containers once. Errors for one container
    /// are recorded on its own record rather than aborting the whole pass.
    pub async fn check_all(&self) -> ImagesResult<usize> {
        let environments = {
            let conn = self.db.conn().await;
            self.db.environments.all(&conn)?
        };

        let mut checked = 0;
        for env in environments.iter().filter(|e| e.enabled) {
            let containers = match self.dispatcher.list_containers(&env.id, false).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("image check skipped environment {}: {}", env.id, e);
                    continue;
                }
            };

            for summary in containers {
                let Some(container_id) = summary.id.clone() else { continue };
                let Some(image) = summary.image.clone() else { continue };
                if let Err(e) = self.check_container(&env.id, &container_id, &image).await {
                    warn!("image check failed for {}: {}", container_id, e);
                }
                checked += 1;
            }
        }
        Ok(checked)
    }

    async fn check_container(&self, environment_id: &str, container_id: &str, image: &str) -> ImagesResult<()> {
        let image_ref = ImageRef::parse(image);
        let started = Instant::now();

        let (credential, credentials) = resolve_credential(&self.db, &self.vault, &image_ref.registry_host).await;

        let auth_method = if credentials.is_some() { "basic" } else { "anonymous" };

        let current_digest = self
            .dispatcher
            .inspect(environment_id, container_id)
            .await
            .ok()
            .and_then(|inspect| inspect.image.clone());

        let record = match self
            .registry_client
            .resolve_digest(&image_ref, credentials.as_ref().map(|(u, p)| (u.as_str(), p.as_str())))
            .await
        {
            Ok(latest_digest) => {
                let update_available = current_digest.as_deref() != Some(latest_digest.as_str());
                let update_type = if !update_available {
                    UpdateType::None
                } else if is_stable_tag(&image_ref.tag) {
                    UpdateType::Digest
                } else {
                    UpdateType::Tag
                };

                ImageUpdateRecord {
                    container_id: container_id.to_string(),
                    environment_id: environment_id.to_string(),
                    image: image.to_string(),
                    current_version: Some(image_ref.tag.clone()),
                    latest_version: Some(image_ref.tag.clone()),
                    current_digest,
                    latest_digest: Some(latest_digest),
                    update_type,
                    update_available,
                    auth_method: Some(auth_method.to_string()),
                    auth_username: credential.as_ref().map(|c| c.username.clone()),
                    error: None,
                    response_time_ms: Some(started.elapsed().as_millis() as i64),
                    last_checked: chrono::Utc::now().timestamp(),
                }
            }
            Err(e) => ImageUpdateRecord {
                container_id: container_id.to_string(),
                environment_id: environment_id.to_string(),
                image: image.to_string(),
                current_version: Some(image_ref.tag.clone()),
                latest_version: None,
                current_digest,
                latest_digest: None,
                update_type: UpdateType::Error,
                update_available: false,
                auth_method: Some(auth_method.to_string()),
                auth_username: credential.as_ref().map(|c| c.username.clone()),
                error: Some(e.to_string()),
                response_time_ms: Some(started.elapsed().as_millis() as i64),
                last_checked: chrono::Utc::now().timestamp(),
            },
        };

        let was_available = {
            let conn = self.db.conn().await;
            self.db.image_updates.get(&conn, container_id)?.map(|r| r.update_available).unwrap_or(false)
        };

        let update_available = record.update_available;
        {
            let conn = self.db.conn().await;
            self.db.image_updates.upsert(&conn, &record)?;
        }

        if update_available && !was_available {
            self.log
                .record(Event::ImageUpdateAvailable {
                    environment_id: environment_id.to_string(),
                    container_id: container_id.to_string(),
                    image: image.to_string(),
                })
                .await;
        }

        Ok(())
    }
}

/// Recreates a container in place against a new image: capture its current
/// config, pull the target image, stop and recreate under the same name,
/// rolling back to the stopped original if the recreate fails.
pub struct ContainerUpdateExecutor {
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    vault: Arc<Vault>,
    log: Arc<Log>,
    system_upgrader: Option<Arc<dyn SystemUpgrader>>,
}

impl ContainerUpdateExecutor {
    pub fn new(db: Arc<Database>, dispatcher: Arc<Dispatcher>, vault: Arc<Vault>, log: Arc<Log>) -> Self {
        Self { db, dispatcher, vault, log, system_upgrader: None }
    }

    pub fn with_system_upgrader(mut self, upgrader: Arc<dyn SystemUpgrader>) -> Self {
        self.system_upgrader = Some(upgrader);
        self
    }

    /// Recreate `container_id` using `new_image` (defaults to the container's
    /// own current image reference when omitted). The container's own config
    /// (env, binds, network, resource limits) is preserved; only the image
    /// reference changes. See §4.7 for the full algorithm, including the
    /// self-upgrade special case and rollback-on-failure.
    pub async fn apply(&self, environment_id: &str, container_id: &str, new_image: Option<&str>, user: &str) -> ImagesResult<UpdateOutcome> {
        let inspect = self.dispatcher.inspect(environment_id, container_id).await?;
        let labels = inspect.config.as_ref().and_then(|c| c.labels.clone()).unwrap_or_default();

        if labels.get(LABEL_ARCANE_SELF).map(String::as_str) == Some("true") {
            return match &self.system_upgrader {
                Some(upgrader) => {
                    upgrader.trigger_upgrade_via_cli(user).map_err(|_| ImagesError::SelfUpgradeUnavailable)?;
                    Ok(UpdateOutcome::DelegatedSelfUpgrade)
                }
                None => Err(ImagesError::SelfUpgradeUnavailable),
            };
        }

        let name = inspect.name.clone().unwrap_or_default().trim_start_matches('/').to_string();
        let config = inspect.config.clone().unwrap_or_default();
        let host_config = inspect.host_config.clone().unwrap_or_default();

        let image = new_image
            .map(|s| s.to_string())
            .or_else(|| config.image.clone())
            .ok_or_else(|| ImagesError::NoImage(container_id.to_string()))?;

        let env: HashMap<String, String> = config
            .env
            .unwrap_or_default()
            .iter()
            .filter_map(|kv| kv.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
            .collect();

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.clone(),
            env,
            labels,
            port_bindings: HashMap::new(),
            binds: host_config.binds.unwrap_or_default(),
            network: host_config.network_mode.clone(),
            memory_bytes: host_config.memory,
            cpu_quota: host_config.cpu_quota,
            restart_policy: host_config.restart_policy.and_then(|p| p.name).map(|n| format!("{n:?}").to_lowercase()),
        };

        self.log
            .record(Event::ImageUpdateApplied { environment_id: environment_id.to_string(), container_id: container_id.to_string(), successful: false })
            .await;

        let image_ref = ImageRef::parse(&image);
        let (_, credentials) = resolve_credential(&self.db, &self.vault, &image_ref.registry_host).await;
        self.dispatcher.pull_image(environment_id, &image, credentials).await?;
        self.dispatcher.stop(environment_id, container_id, 30).await?;

        // The stopped original is still holding `name`; free it up before
        // creating the replacement under the same name (step 4).
        let renamed_original = format!("{name}-old-{}", chrono::Utc::now().timestamp());
        self.dispatcher.rename(environment_id, container_id, &renamed_original).await?;

        match self.create_and_start(environment_id, &spec).await {
            Ok(new_id) => {
                if let Err(e) = self.dispatcher.remove(environment_id, container_id, false, false).await {
                    warn!("failed to remove old container {} after successful update: {}", container_id, e);
                }
                self.migrate_record(container_id, &new_id).await?;

                self.log
                    .record(Event::ImageUpdateApplied { environment_id: environment_id.to_string(), container_id: new_id.clone(), successful: true })
                    .await;

                info!("recreated container {} ({}) as {} on {}", name, container_id, new_id, image);
                Ok(UpdateOutcome::Updated { new_container_id: new_id })
            }
            Err(create_err) => {
                warn!("container update failed for {}, rolling back: {}", container_id, create_err);

                if let Err(e) = self.dispatcher.rename(environment_id, container_id, &name).await {
                    warn!("rollback: failed to restore original name for {}: {}", container_id, e);
                }
                if let Err(e) = self.dispatcher.start(environment_id, container_id).await {
                    warn!("rollback: failed to restart original container {}: {}", container_id, e);
                }

                self.log
                    .record(Event::ContainerError {
                        environment_id: environment_id.to_string(),
                        container_id: container_id.to_string(),
                        message: format!("update failed, rolled back: {create_err}"),
                    })
                    .await;

                Ok(UpdateOutcome::RolledBack { error: create_err.to_string() })
            }
        }
    }

    async fn create_and_start(&self, environment_id: &str, spec: &ContainerSpec) -> ImagesResult<String> {
        let new_id = self.dispatcher.create(environment_id, spec).await?;
        if let Err(e) = self.dispatcher.start(environment_id, &new_id).await {
            let _ = self.dispatcher.remove(environment_id, &new_id, true, true).await;
            return Err(e.into());
        }
        Ok(new_id)
    }

    async fn migrate_record(&self, old_container_id: &str, new_container_id: &str) -> ImagesResult<()> {
        let conn = self.db.conn().await;
        if let Some(mut record) = self.db.image_updates.get(&conn, old_container_id)? {
            self.db.image_updates.delete(&conn, old_container_id)?;
            record.container_id = new_container_id.to_string();
            record.update_available = false;
            record.update_type = UpdateType::None;
            record.current_digest = record.latest_digest.clone();
            self.db.image_updates.upsert(&conn, &record)?;
        }
        Ok(())
    }
}
