//! Liveness probe
//!
//! Reachable without a token (see `router::auth`) so the Environment
//! Registry can poll a remote agent's connectivity before it has any
//! credential for it at all.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let environments = state.registry.all().await.map(|e| e.len()).unwrap_or(0);
    Json(json!({
        "status": "ok",
        "environments": environments,
    }))
}
