//! Container operations against a named environment, forwarded to the
//! local Docker Gateway or a paired agent by the Dispatcher.

use axum::extract::{Path, Query, State};
use axum::Json;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use serde::Deserialize;
use serde_json::json;

use crate::error::ArcaneError;
use crate::images::autoupdate::{AutoUpdateItem, AutoUpdateSummary};
use crate::images::UpdateOutcome;

use super::dto::{ContainerCreateRequest, ContainerDeleteRequest, ContainerUpdateRequest};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    all: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Path(environment_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ContainerSummary>>, ArcaneError> {
    Ok(Json(state.dispatcher.list_containers(&environment_id, q.all).await?))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
) -> Result<Json<ContainerInspectResponse>, ArcaneError> {
    Ok(Json(state.dispatcher.inspect(&environment_id, &cid).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(environment_id): Path<String>,
    Json(body): Json<ContainerCreateRequest>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let spec = body.into();
    let id = state.dispatcher.create(&environment_id, &spec).await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn start(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.dispatcher.start(&environment_id, &cid).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct TimeoutQuery {
    #[serde(default = "default_timeout")]
    timeout: i64,
}

fn default_timeout() -> i64 {
    10
}

pub async fn stop(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
    Query(q): Query<TimeoutQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.dispatcher.stop(&environment_id, &cid, q.timeout).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn restart(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
    Query(q): Query<TimeoutQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.dispatcher.restart(&environment_id, &cid, q.timeout).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
    Json(body): Json<ContainerDeleteRequest>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.dispatcher.remove(&environment_id, &cid, body.force, body.volumes).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn update(
    State(state): State<AppState>,
    Path((environment_id, cid)): Path<(String, String)>,
    Json(body): Json<ContainerUpdateRequest>,
) -> Result<Json<AutoUpdateSummary>, ArcaneError> {
    let outcome = state.update_executor.apply(&environment_id, &cid, body.image.as_deref(), "api").await?;

    let summary = match outcome {
        UpdateOutcome::Updated { new_container_id } => AutoUpdateSummary {
            updated: 1,
            failed: 0,
            items: vec![AutoUpdateItem { container_id: new_container_id, status: "updated".to_string(), error: None }],
        },
        UpdateOutcome::DelegatedSelfUpgrade => AutoUpdateSummary {
            updated: 1,
            failed: 0,
            items: vec![AutoUpdateItem { container_id: cid, status: "delegated".to_string(), error: None }],
        },
        UpdateOutcome::RolledBack { error } => AutoUpdateSummary {
            updated: 0,
            failed: 1,
            items: vec![AutoUpdateItem { container_id: cid, status: "rolled_back".to_string(), error: Some(error) }],
        },
    };

    Ok(Json(summary))
}
