//! Runtime settings: a full read of the cache, and a validated batch write.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;

use crate::error::ArcaneError;

use super::AppState;

pub async fn get_all(State(state): State<AppState>) -> Json<HashMap<String, String>> {
    Json(state.settings.all())
}

pub async fn set_batch(State(state): State<AppState>, Json(body): Json<HashMap<String, String>>) -> Result<Json<HashMap<String, String>>, ArcaneError> {
    state.settings.set_batch(body).await?;
    Ok(Json(state.settings.all()))
}
