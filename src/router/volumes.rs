//! Volume Browser (list/preview/download via a pooled helper container) and
//! Backup Engine (create/restore/delete archived snapshots) HTTP surface.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::database::VolumeBackup;
use crate::error::ArcaneError;
use crate::volumes::VolumeEntry;

use super::dto::{VolumeBackupCreateRequest, VolumeRestoreRequest};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    "/".to_string()
}

pub async fn list_entries(
    State(state): State<AppState>,
    Path((environment_id, volume_name)): Path<(String, String)>,
    Query(q): Query<PathQuery>,
) -> Result<Json<Vec<VolumeEntry>>, ArcaneError> {
    Ok(Json(state.volume_browser.list(&environment_id, &volume_name, &q.path).await?))
}

const PREVIEW_MAX_BYTES: u64 = 64 * 1024;

pub async fn preview(
    State(state): State<AppState>,
    Path((environment_id, volume_name)): Path<(String, String)>,
    Query(q): Query<PathQuery>,
) -> Result<Response, ArcaneError> {
    let (bytes, mime) = state.volume_browser.preview(&environment_id, &volume_name, &q.path, PREVIEW_MAX_BYTES).await?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

pub async fn download(
    State(state): State<AppState>,
    Path((environment_id, volume_name)): Path<(String, String)>,
    Query(q): Query<PathQuery>,
) -> Result<Response, ArcaneError> {
    let bytes = state.volume_browser.download(&environment_id, &volume_name, &q.path).await?;
    let filename = q.path.rsplit('/').next().unwrap_or(&volume_name).to_string();
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok(([(header::CONTENT_TYPE, "application/octet-stream".to_string()), (header::CONTENT_DISPOSITION, disposition)], bytes).into_response())
}

pub async fn list_backups(
    State(state): State<AppState>,
    Path((_environment_id, volume_name)): Path<(String, String)>,
) -> Result<Json<Vec<VolumeBackup>>, ArcaneError> {
    Ok(Json(state.backup_engine.list(&volume_name).await?))
}

pub async fn create_backup(
    State(state): State<AppState>,
    Path((environment_id, volume_name)): Path<(String, String)>,
    Json(body): Json<VolumeBackupCreateRequest>,
) -> Result<Json<VolumeBackup>, ArcaneError> {
    Ok(Json(state.backup_engine.create(&environment_id, &volume_name, &body.name).await?))
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Path((environment_id, backup_id)): Path<(String, String)>,
    Query(q): Query<TargetVolumeQuery>,
    Json(body): Json<VolumeRestoreRequest>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    match body.paths {
        Some(paths) => state.backup_engine.restore_files(&environment_id, &backup_id, &q.target_volume, &paths).await?,
        None => state.backup_engine.restore(&environment_id, &backup_id, &q.target_volume).await?,
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct TargetVolumeQuery {
    target_volume: String,
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path((environment_id, backup_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.backup_engine.delete(&environment_id, &backup_id).await?;
    Ok(Json(json!({ "success": true })))
}
