//! Notification channel CRUD backing the Notification Dispatcher.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::database::NotificationChannel;
use crate::error::ArcaneError;

use super::dto::NotificationChannelRequest;
use super::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<NotificationChannel>>, ArcaneError> {
    let conn = state.db.conn().await;
    Ok(Json(state.db.notification_channels.all(&conn)?))
}

pub async fn upsert(State(state): State<AppState>, Json(body): Json<NotificationChannelRequest>) -> Result<Json<NotificationChannel>, ArcaneError> {
    let now = chrono::Utc::now().timestamp();
    let channel = NotificationChannel {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: body.name,
        provider: body.provider,
        enabled: body.enabled,
        config: body.config,
        events: body.events,
        created_at: now,
        updated_at: now,
    };

    let conn = state.db.conn().await;
    state.db.notification_channels.upsert(&conn, &channel)?;
    Ok(Json(channel))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ArcaneError> {
    let conn = state.db.conn().await;
    let removed = state.db.notification_channels.delete(&conn, &id)?;
    Ok(Json(json!({ "success": removed })))
}
