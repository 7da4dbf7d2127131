//! API key persistence, used to authenticate callers of the manager's HTTP surface

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    /// SHA-256 hex digest of the presented token; the raw token is never stored
    pub token_hash: String,
    /// First few characters of the plaintext token, shown in listings so an
    /// operator can recognize a key without the daemon retaining the secret.
    pub key_prefix: String,
    pub name: String,
    pub description: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub last_used: Option<i64>,
}

impl ApiKey {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

pub struct ApiKeyStore;

const KEY_COLUMNS: &str = "id, token_hash, key_prefix, name, description, expires_at, created_at, last_used";

impl ApiKeyStore {
    pub fn new() -> Self {
        Self
    }

    pub fn by_hash(&self, conn: &Connection, token_hash: &str) -> DatabaseResult<Option<ApiKey>> {
        let result = conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE token_hash = ?1"),
            [token_hash],
            Self::row_to_key,
        );

        match result {
            Ok(k) => Ok(Some(k)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<ApiKey>> {
        let mut stmt = conn.prepare(&format!("SELECT {KEY_COLUMNS} FROM api_keys"))?;
        let rows = stmt.query_map([], Self::row_to_key)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert(&self, conn: &Connection, key: &ApiKey) -> DatabaseResult<()> {
        conn.execute(
            "INSERT INTO api_keys (id, token_hash, key_prefix, name, description, expires_at, created_at, last_used) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                key.id,
                key.token_hash,
                key.key_prefix,
                key.name,
                key.description,
                key.expires_at,
                key.created_at,
                key.last_used
            ],
        )?;
        Ok(())
    }

    pub fn touch(&self, conn: &Connection, id: &str, used_at: i64) -> DatabaseResult<()> {
        conn.execute("UPDATE api_keys SET last_used = ?2 WHERE id = ?1", rusqlite::params![id, used_at])?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let changed = conn.execute("DELETE FROM api_keys WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn row_to_key(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
        Ok(ApiKey {
            id: row.get(0)?,
            token_hash: row.get(1)?,
            key_prefix: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            expires_at: row.get(5)?,
            created_at: row.get(6)?,
            last_used: row.get(7)?,
        })
    }
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired() {
        let key = ApiKey {
            id: "1".into(),
            token_hash: "h".into(),
            key_prefix: "arc_ab12".into(),
            name: "ci".into(),
            description: None,
            expires_at: Some(100),
            created_at: 0,
            last_used: None,
        };
        assert!(key.is_expired(100));
        assert!(!key.is_expired(50));
    }
}
