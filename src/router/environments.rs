//! Environment Registry handlers

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::database::Environment;
use crate::error::ArcaneError;

use super::dto::{PairRequest, RegisterEnvironmentRequest};
use super::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Environment>>, ArcaneError> {
    Ok(Json(state.registry.all().await?))
}

pub async fn register(State(state): State<AppState>, Json(body): Json<RegisterEnvironmentRequest>) -> Result<Json<Environment>, ArcaneError> {
    let mut env = Environment::new_local(body.id, body.name);
    env.kind = body.kind;
    env.agent_url = body.agent_url;
    state.registry.register(env.clone()).await?;
    Ok(Json(env))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Environment>, ArcaneError> {
    Ok(Json(state.registry.get(&id).await?))
}

pub async fn unregister(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ArcaneError> {
    state.registry.unregister(&id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn pair(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<PairRequest>) -> Result<Json<Value>, ArcaneError> {
    state.registry.pair_agent(&id, &body.agent_url, &body.bootstrap_token, &state.vault).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn test_connection(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ArcaneError> {
    let online = state.registry.test_connection(&id).await?;
    Ok(Json(json!({ "online": online })))
}
