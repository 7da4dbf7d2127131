//! Environment Registry
//!
//! Tracks every Docker host under management — the local daemon plus any
//! remote hosts reachable through a paired agent — and lazily owns the
//! per-environment [`DockerGateway`] used to talk to it. Remote environments
//! don't get a gateway at all: the Dispatcher routes their operations over
//! HTTP instead, see `dispatch::Dispatcher`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::crypto::Vault;
use crate::database::{Database, Environment, EnvironmentStatus, LOCAL_ENVIRONMENT_ID};

use super::gateway::DockerGateway;
use super::traits::EnvironmentError;

const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lazily-initialized, reconstructible handle to a local environment's
/// Docker client. `None` means either never connected yet, or dropped after
/// an offline transition (Open Question 2) — the next access rebuilds it.
struct GatewaySlot(Mutex<Option<Arc<DockerGateway>>>);

impl GatewaySlot {
    fn empty() -> Self {
        Self(Mutex::new(None))
    }

    fn get(&self) -> Option<Arc<DockerGateway>> {
        self.0.lock().clone()
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }
}

pub struct Registry {
    db: Arc<Database>,
    slots: DashMap<String, GatewaySlot>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("environment not found: {0}")]
    NotFound(String),

    #[error("environment {0} already registered")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("docker error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("connection test request failed: {0}")]
    ConnectionTest(#[from] reqwest::Error),

    #[error("pairing unsuccessful: {0}")]
    Pairing(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl Registry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, slots: DashMap::new() }
    }

    /// Ensure the local environment row exists, creating it on first boot.
    pub async fn ensure_local(&self) -> RegistryResult<()> {
        let conn = self.db.conn().await;
        if self.db.environments.get(&conn, LOCAL_ENVIRONMENT_ID)?.is_none() {
            let env = Environment::new_local(LOCAL_ENVIRONMENT_ID, "Local Docker");
            self.db.environments.upsert(&conn, &env)?;
            info!("registered local environment");
        }
        drop(conn);
        self.slots.entry(LOCAL_ENVIRONMENT_ID.to_string()).or_insert_with(GatewaySlot::empty);
        Ok(())
    }

    pub async fn register(&self, env: Environment) -> RegistryResult<()> {
        let conn = self.db.conn().await;
        if self.db.environments.get(&conn, &env.id)?.is_some() {
            return Err(RegistryError::AlreadyExists(env.id));
        }
        self.db.environments.upsert(&conn, &env)?;
        drop(conn);
        self.slots.entry(env.id.clone()).or_insert_with(GatewaySlot::empty);
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> RegistryResult<()> {
        let conn = self.db.conn().await;
        if !self.db.environments.delete(&conn, id)? {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        drop(conn);
        self.slots.remove(id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Environment> {
        let conn = self.db.conn().await;
        self.db
            .environments
            .get(&conn, id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn all(&self) -> RegistryResult<Vec<Environment>> {
        let conn = self.db.conn().await;
        Ok(self.db.environments.all(&conn)?)
    }

    /// Get (or lazily create) the Docker gateway for a local environment.
    /// Remote environments have no gateway; callers should route through the
    /// Dispatcher instead. Double-checked locking: the fast path only takes
    /// the slot's mutex, never the registry-wide map lock, so concurrent
    /// requests for different environments never contend.
    pub async fn gateway(&self, id: &str) -> RegistryResult<Arc<DockerGateway>> {
        let env = self.get(id).await?;
        if !env.is_local() {
            return Err(RegistryError::Environment(EnvironmentError::Other(format!(
                "{id} is a remote environment; dispatch over the agent instead"
            ))));
        }

        let slot = self.slots.entry(id.to_string()).or_insert_with(GatewaySlot::empty);

        if let Some(existing) = slot.get() {
            return Ok(existing);
        }

        let gateway = Arc::new(DockerGateway::connect_local()?);
        *slot.0.lock() = Some(gateway.clone());
        Ok(gateway)
    }

    /// Record a heartbeat result. On a transition into offline, drop the
    /// cached gateway so the next successful heartbeat reconnects with a
    /// fresh client rather than reusing one that may be wrapping a dead
    /// connection.
    pub async fn record_heartbeat(&self, id: &str, online: bool) -> RegistryResult<bool> {
        let previous = self.get(id).await?.status;
        let status = if online { EnvironmentStatus::Online } else { EnvironmentStatus::Offline };

        let conn = self.db.conn().await;
        self.db
            .environments
            .set_status(&conn, id, status, chrono::Utc::now().timestamp())?;
        drop(conn);

        let transitioned = previous != status;
        if transitioned && !online {
            if let Some(slot) = self.slots.get(id) {
                slot.clear();
            }
            warn!("environment {} went offline, gateway client dropped", id);
        }

        Ok(transitioned)
    }

    /// Probe connectivity for an already-registered environment and persist
    /// the observed status. Local environments are pinged through the
    /// gateway's own Docker client; remote ones get a `GET /api/health`
    /// against their agent URL with a 10s deadline.
    pub async fn test_connection(&self, id: &str) -> RegistryResult<bool> {
        let env = self.get(id).await?;
        let online = if env.is_local() {
            match self.gateway(id).await {
                Ok(gateway) => gateway.ping().await,
                Err(_) => false,
            }
        } else {
            Self::probe_remote(&env.agent_url).await.unwrap_or(false)
        };

        self.record_heartbeat(id, online).await?;
        Ok(online)
    }

    /// Probe connectivity for a URL that may not correspond to any saved
    /// environment (e.g. the "Test Connection" button on an unsaved form).
    /// Never touches persisted status.
    pub async fn test_connection_unsaved(agent_url: &str) -> RegistryResult<bool> {
        Self::probe_remote(agent_url).await.map_err(RegistryError::ConnectionTest)
    }

    async fn probe_remote(agent_url: &str) -> Result<bool, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(CONNECTION_TEST_TIMEOUT).build()?;
        let url = format!("{}/api/health", agent_url.trim_end_matches('/'));
        match client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) if e.is_timeout() || e.is_connect() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Pair with a remote agent: POST the bootstrap token to
    /// `<agentURL>/api/environments/0/agent/pair`, persist the returned
    /// long-lived token encrypted at rest, and mark the environment online.
    pub async fn pair_agent(&self, id: &str, agent_url: &str, bootstrap_token: &str, vault: &Vault) -> RegistryResult<()> {
        let client = reqwest::Client::builder()
            .timeout(CONNECTION_TEST_TIMEOUT)
            .build()
            .map_err(RegistryError::ConnectionTest)?;

        let url = format!("{}/api/environments/0/agent/pair", agent_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .header("X-Arcane-Agent-Bootstrap", bootstrap_token)
            .send()
            .await
            .map_err(RegistryError::ConnectionTest)?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Pairing(body));
        }

        #[derive(serde::Deserialize)]
        struct PairData {
            token: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct PairResponse {
            #[allow(dead_code)]
            success: bool,
            data: Option<PairData>,
        }
        let body: PairResponse = response
            .json()
            .await
            .map_err(|_| RegistryError::Pairing("pairing unsuccessful".to_string()))?;
        let token = body
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| RegistryError::Pairing("pairing unsuccessful".to_string()))?;

        let encrypted = vault
            .encrypt(&token)
            .map_err(|e| RegistryError::Pairing(format!("failed to encrypt agent token: {e}")))?;

        let mut env = self.get(id).await?;
        env.agent_url = agent_url.to_string();
        env.agent_token = encrypted;
        env.status = EnvironmentStatus::Online;
        env.last_heartbeat = Some(chrono::Utc::now().timestamp());

        let conn = self.db.conn().await;
        self.db.environments.upsert(&conn, &env)?;
        drop(conn);

        info!("paired agent for environment {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_local_is_idempotent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new(db);

        registry.ensure_local().await.unwrap();
        registry.ensure_local().await.unwrap();

        let all = registry.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, LOCAL_ENVIRONMENT_ID);
    }

    #[tokio::test]
    async fn test_register_duplicate_rejected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new(db);

        registry.register(Environment::new_local("a", "A")).await.unwrap();
        let err = registry.register(Environment::new_local("a", "A again")).await;
        assert!(matches!(err, Err(RegistryError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_transition_clears_gateway_slot() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new(db);
        registry.ensure_local().await.unwrap();

        let transitioned = registry.record_heartbeat(LOCAL_ENVIRONMENT_ID, false).await.unwrap();
        assert!(transitioned);
        assert!(registry.slots.get(LOCAL_ENVIRONMENT_ID).unwrap().get().is_none());

        let transitioned_again = registry.record_heartbeat(LOCAL_ENVIRONMENT_ID, false).await.unwrap();
        assert!(!transitioned_again);
    }
}
