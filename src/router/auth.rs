//! Authentication middleware shared by the manager-facing and agent
//! wire-protocol surfaces.
//!
//! One bearer token scheme guards both: `agent.token` is the pre-shared
//! bootstrap secret accepted on every request, and any token minted during a
//! successful pairing handshake (see [`super::agent::accept_pairing`]) is
//! also accepted, looked up by its SHA-256 hash in the API Key store the
//! same way the teacher's panel token guard resolved a bearer header against
//! a stored hash instead of comparing plaintext.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::crypto::sha256_hex;

use super::AppState;

const TOKEN_HEADER: &str = "X-Arcane-Agent-Token";

/// Paths reachable without a token: a health probe (used by the Environment
/// Registry's own connection test against a remote agent) and the pairing
/// handshake, which authenticates with a different header entirely.
const OPEN_PATHS: &[&str] = &["/api/health", "/api/environments/0/agent/pair"];

pub async fn require_agent_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if OPEN_PATHS.contains(&path) {
        return next.run(request).await;
    }

    // An unset token disables auth entirely, the same escape hatch the
    // teacher's own config-driven guards leave for local development.
    if state.config.agent.token.is_empty() {
        return next.run(request).await;
    }

    let provided = request.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    match provided {
        Some(token) if token_is_valid(&state, &token).await => next.run(request).await,
        _ => unauthorized(),
    }
}

async fn token_is_valid(state: &AppState, token: &str) -> bool {
    if token == state.config.agent.token {
        return true;
    }

    let hash = sha256_hex(token);
    let key = {
        let conn = state.db.conn().await;
        match state.db.api_keys.by_hash(&conn, &hash) {
            Ok(key) => key,
            Err(_) => return false,
        }
    };

    let Some(key) = key else { return false };
    let now = chrono::Utc::now().timestamp();
    if key.is_expired(now) {
        return false;
    }

    let conn = state.db.conn().await;
    let _ = state.db.api_keys.touch(&conn, &key.id, now);
    true
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": true, "message": "missing or invalid X-Arcane-Agent-Token" }))).into_response()
}
