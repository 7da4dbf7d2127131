//! GitOps sync target CRUD plus an on-demand sync trigger.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::database::GitOpsTarget;
use crate::error::ArcaneError;
use crate::gitops::SyncOutcome;

use super::dto::GitOpsTargetRequest;
use super::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<GitOpsTarget>>, ArcaneError> {
    let conn = state.db.conn().await;
    Ok(Json(state.db.gitops_targets.all(&conn)?))
}

pub async fn upsert(State(state): State<AppState>, Json(body): Json<GitOpsTargetRequest>) -> Result<Json<GitOpsTarget>, ArcaneError> {
    let id = body.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let project_name = if body.project_name.is_empty() { id.clone() } else { body.project_name };

    let target = GitOpsTarget {
        id,
        environment_id: body.environment_id,
        repo_url: body.repo_url,
        branch: body.branch,
        project_name,
        compose_path: body.compose_path,
        auto_sync: body.auto_sync,
        sync_interval_secs: body.sync_interval_secs,
        last_applied_hash: None,
        last_synced: None,
        last_error: None,
        created_at: chrono::Utc::now().timestamp(),
    };

    let conn = state.db.conn().await;
    state.db.gitops_targets.upsert(&conn, &target)?;
    Ok(Json(target))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    let conn = state.db.conn().await;
    let removed = state.db.gitops_targets.delete(&conn, &id)?;
    Ok(Json(json!({ "success": removed })))
}

pub async fn sync_now(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SyncOutcome>, ArcaneError> {
    Ok(Json(state.gitops.sync_one(&id).await?))
}
