//! Wire protocol a manager's `dispatch::AgentClient` speaks against a
//! paired agent's local Docker Gateway.
//!
//! Every handler here operates on the agent's own environment directly
//! through `Registry::gateway`, never through the `Dispatcher` — an agent
//! has no further hop to forward to.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::crypto::sha256_hex;
use crate::database::{ApiKey, LOCAL_ENVIRONMENT_ID};
use crate::environment::ContainerSpec;
use crate::error::ArcaneError;

use super::dto::ContainerCreateRequest;
use super::AppState;

const BOOTSTRAP_HEADER: &str = "X-Arcane-Agent-Bootstrap";

/// Handshake an unpaired agent into the registry: the caller presents the
/// pre-shared bootstrap secret and receives back a freshly minted token that
/// replaces it for every subsequent request.
pub async fn accept_pairing(State(state): State<AppState>, request: axum::extract::Request) -> Result<Json<serde_json::Value>, ArcaneError> {
    let presented = request
        .headers()
        .get(BOOTSTRAP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if presented.is_empty() || presented != state.config.agent.token {
        return Err(ArcaneError::Validation("invalid bootstrap token".to_string()));
    }

    let raw_token = uuid::Uuid::new_v4().to_string();
    let hash = sha256_hex(&raw_token);
    let now = chrono::Utc::now().timestamp();

    let key = ApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        token_hash: hash,
        key_prefix: raw_token.chars().take(8).collect(),
        name: "agent-pairing".to_string(),
        description: Some("issued by /agent/pair handshake".to_string()),
        expires_at: None,
        created_at: now,
        last_used: None,
    };

    let conn = state.db.conn().await;
    state.db.api_keys.insert(&conn, &key)?;
    drop(conn);

    Ok(Json(json!({ "success": true, "data": { "token": raw_token } })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    all: bool,
}

pub async fn list_containers(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Result<Json<Vec<bollard::models::ContainerSummary>>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    Ok(Json(gateway.list_containers(q.all).await?))
}

pub async fn inspect_container(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<bollard::models::ContainerInspectResponse>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    Ok(Json(gateway.inspect(&id).await?))
}

pub async fn create_container(State(state): State<AppState>, Json(body): Json<ContainerCreateRequest>) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    let spec: ContainerSpec = body.into();
    let id = gateway.create(&spec).await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn start_container(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    gateway.start(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct TimeoutQuery {
    #[serde(default = "default_stop_timeout")]
    timeout: i64,
}

fn default_stop_timeout() -> i64 {
    10
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<TimeoutQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    gateway.stop(&id, q.timeout).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn restart_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<TimeoutQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    gateway.restart(&id, q.timeout).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct RenameQuery {
    name: String,
}

pub async fn rename_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RenameQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    gateway.rename(&id, &q.name).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    volumes: bool,
}

pub async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ForceQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    gateway.remove(&id, q.force, q.volumes).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    cmd: Vec<String>,
}

pub async fn exec_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExecRequest>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    let (exit_code, output) = gateway.exec(&id, body.cmd).await?;
    Ok(Json(json!({
        "exit_code": exit_code,
        "output": String::from_utf8_lossy(&output),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    image: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullCredentialsBody {
    username: Option<String>,
    password: Option<String>,
}

pub async fn pull_image(
    State(state): State<AppState>,
    Query(q): Query<PullQuery>,
    Json(body): Json<PullCredentialsBody>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let gateway = state.registry.gateway(LOCAL_ENVIRONMENT_ID).await?;
    let credentials = match (body.username, body.password) {
        (Some(username), Some(password)) => Some(bollard::auth::DockerCredentials { username: Some(username), password: Some(password), ..Default::default() }),
        _ => None,
    };
    gateway.pull_image(&q.image, credentials).await?;
    Ok(Json(json!({ "success": true })))
}

