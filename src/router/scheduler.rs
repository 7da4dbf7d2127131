//! Scheduled job introspection and manual control.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::ArcaneError;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct JobView {
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub can_run_manually: bool,
    pub running: bool,
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_run_secs_ago: Option<u64>,
    pub last_duration_ms: u64,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<JobView>>, ArcaneError> {
    let mut views = Vec::new();
    for name in state.scheduler.list().await {
        let Some(handle) = state.scheduler.get(&name).await else { continue };
        let stats = handle.stats().await;
        views.push(JobView {
            name: handle.name.clone(),
            cron: handle.cron.read().await.clone(),
            enabled: handle.is_enabled(),
            can_run_manually: handle.can_run_manually,
            running: handle.running.load(std::sync::atomic::Ordering::SeqCst),
            run_count: stats.run_count,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            last_run_secs_ago: stats.last_run.map(|t| t.elapsed().as_secs()),
            last_duration_ms: stats.last_duration_ms,
        });
    }
    Ok(Json(views))
}

pub async fn run_now(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.scheduler.run_now(&name).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn enable(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.scheduler.enable(&name).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn disable(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    state.scheduler.disable(&name).await?;
    Ok(Json(json!({ "success": true })))
}
