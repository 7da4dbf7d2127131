//! Container Registry credentials: CRUD on the manager side, plus the sync
//! endpoint a paired agent calls to pull the current credential set before
//! attempting a private image pull itself.

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use crate::database::RegistryCredential;
use crate::error::ArcaneError;

use super::dto::RegistryCredentialRequest;
use super::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<RegistryCredential>>, ArcaneError> {
    let conn = state.db.conn().await;
    let mut creds = state.db.registry_credentials.all(&conn)?;
    drop(conn);
    for c in &mut creds {
        c.token = "***".to_string();
    }
    Ok(Json(creds))
}

pub async fn upsert(State(state): State<AppState>, Json(body): Json<RegistryCredentialRequest>) -> Result<Json<RegistryCredential>, ArcaneError> {
    let encrypted_token = state.vault.encrypt(&body.token)?;

    let cred = RegistryCredential {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        registry_host: body.registry_host,
        username: body.username,
        token: encrypted_token,
        enabled: body.enabled,
        insecure: body.insecure,
        created_at: chrono::Utc::now().timestamp(),
    };

    let conn = state.db.conn().await;
    state.db.registry_credentials.upsert(&conn, &cred)?;
    drop(conn);

    let mut masked = cred;
    masked.token = "***".to_string();
    Ok(Json(masked))
}

/// Returns every enabled credential with its token decrypted, so a paired
/// agent can authenticate its own pulls against the same registries the
/// manager already trusts. Reachable only with a valid `X-Arcane-Agent-Token`.
pub async fn sync(State(state): State<AppState>) -> Result<Json<Vec<RegistryCredential>>, ArcaneError> {
    let conn = state.db.conn().await;
    let creds = state.db.registry_credentials.all(&conn)?;
    drop(conn);

    let mut decrypted = Vec::with_capacity(creds.len());
    for mut c in creds.into_iter().filter(|c| c.enabled) {
        c.token = state.vault.decrypt(&c.token)?;
        decrypted.push(c);
    }
    Ok(Json(decrypted))
}
