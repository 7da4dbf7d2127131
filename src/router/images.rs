//! Image pulls and the Image Update Engine's recorded drift per container.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::database::ImageUpdateRecord;
use crate::error::ArcaneError;
use crate::images::ImageRef;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    image: String,
}

/// Pulls an image against the named environment, authenticating with a
/// matching enabled registry credential when one exists. Resolves once the
/// pull completes rather than streaming per-layer progress back to the
/// caller; layer progress is logged by the gateway itself via `tracing`.
pub async fn pull(
    State(state): State<AppState>,
    Path(environment_id): Path<String>,
    Query(q): Query<PullQuery>,
) -> Result<Json<serde_json::Value>, ArcaneError> {
    let image_ref = ImageRef::parse(&q.image);
    let credential = {
        let conn = state.db.conn().await;
        state.db.registry_credentials.for_host(&conn, &image_ref.registry_host)?
    };
    let credentials = match credential {
        Some(c) => Some((c.username, state.vault.decrypt(&c.token)?)),
        None => None,
    };

    state.dispatcher.pull_image(&environment_id, &q.image, credentials).await?;
    Ok(Json(json!({ "success": true, "image": q.image })))
}

pub async fn updates(State(state): State<AppState>, Path(environment_id): Path<String>) -> Result<Json<Vec<ImageUpdateRecord>>, ArcaneError> {
    let conn = state.db.conn().await;
    let all = state.db.image_updates.all(&conn)?;
    drop(conn);
    Ok(Json(all.into_iter().filter(|r| r.environment_id == environment_id).collect()))
}
