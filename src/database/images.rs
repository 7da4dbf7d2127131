//! Image update record and registry credential persistence

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

/// Classifies what kind of change was observed between the digest a
/// container is running and the digest/tag the registry currently serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// No change, or not yet checked.
    None,
    /// Same tag, different digest (a "latest"-style floating tag moved).
    Digest,
    /// A newer version tag is available.
    Tag,
    /// The last check failed; see `ImageUpdateRecord::error`.
    Error,
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateType::None => write!(f, "none"),
            UpdateType::Digest => write!(f, "digest"),
            UpdateType::Tag => write!(f, "tag"),
            UpdateType::Error => write!(f, "error"),
        }
    }
}

impl UpdateType {
    fn parse(s: &str) -> Self {
        match s {
            "digest" => UpdateType::Digest,
            "tag" => UpdateType::Tag,
            "error" => UpdateType::Error,
            _ => UpdateType::None,
        }
    }
}

/// Tracks the last known digest/version for an image a container is
/// running, so the Image Update Engine can detect drift without
/// re-resolving every poll and can explain *why* a check failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpdateRecord {
    pub container_id: String,
    pub environment_id: String,
    pub image: String,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub current_digest: Option<String>,
    pub latest_digest: Option<String>,
    pub update_type: UpdateType,
    pub update_available: bool,
    /// `"anonymous"`, `"basic"`, or `"bearer"` — whichever credential path
    /// resolved the digest, for diagnosing a bad registry credential.
    pub auth_method: Option<String>,
    pub auth_username: Option<String>,
    pub error: Option<String>,
    pub response_time_ms: Option<i64>,
    pub last_checked: i64,
}

pub struct ImageUpdateStore;

const RECORD_COLUMNS: &str = "container_id, environment_id, image, current_version, latest_version, \
    current_digest, latest_digest, update_type, update_available, auth_method, auth_username, \
    error, response_time_ms, last_checked";

impl ImageUpdateStore {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, conn: &Connection, container_id: &str) -> DatabaseResult<Option<ImageUpdateRecord>> {
        let result = conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM image_update_records WHERE container_id = ?1"),
            [container_id],
            Self::row_to_record,
        );

        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<ImageUpdateRecord>> {
        let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM image_update_records ORDER BY container_id ASC"))?;
        let rows = stmt.query_map([], Self::row_to_record)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_pending(&self, conn: &Connection) -> DatabaseResult<Vec<ImageUpdateRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM image_update_records WHERE update_available = 1 ORDER BY container_id ASC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_record)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert(&self, conn: &Connection, r: &ImageUpdateRecord) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO image_update_records
                (container_id, environment_id, image, current_version, latest_version,
                 current_digest, latest_digest, update_type, update_available,
                 auth_method, auth_username, error, response_time_ms, last_checked)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(container_id) DO UPDATE SET
                environment_id = excluded.environment_id,
                image = excluded.image,
                current_version = excluded.current_version,
                latest_version = excluded.latest_version,
                current_digest = excluded.current_digest,
                latest_digest = excluded.latest_digest,
                update_type = excluded.update_type,
                update_available = excluded.update_available,
                auth_method = excluded.auth_method,
                auth_username = excluded.auth_username,
                error = excluded.error,
                response_time_ms = excluded.response_time_ms,
                last_checked = excluded.last_checked
            "#,
            rusqlite::params![
                r.container_id,
                r.environment_id,
                r.image,
                r.current_version,
                r.latest_version,
                r.current_digest,
                r.latest_digest,
                r.update_type.to_string(),
                r.update_available as i32,
                r.auth_method,
                r.auth_username,
                r.error,
                r.response_time_ms,
                r.last_checked,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, container_id: &str) -> DatabaseResult<()> {
        conn.execute("DELETE FROM image_update_records WHERE container_id = ?1", [container_id])?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ImageUpdateRecord> {
        let update_type: String = row.get(7)?;
        Ok(ImageUpdateRecord {
            container_id: row.get(0)?,
            environment_id: row.get(1)?,
            image: row.get(2)?,
            current_version: row.get(3)?,
            latest_version: row.get(4)?,
            current_digest: row.get(5)?,
            latest_digest: row.get(6)?,
            update_type: UpdateType::parse(&update_type),
            update_available: row.get::<_, i32>(8)? != 0,
            auth_method: row.get(9)?,
            auth_username: row.get(10)?,
            error: row.get(11)?,
            response_time_ms: row.get(12)?,
            last_checked: row.get(13)?,
        })
    }
}

impl Default for ImageUpdateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry credentials used to authenticate image pulls/digest lookups.
/// `token` is stored as an `aes-gcm`-encrypted ciphertext (see `crypto::Vault`),
/// never in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub id: String,
    pub registry_host: String,
    pub username: String,
    /// Base64-encoded `nonce || ciphertext`
    pub token: String,
    pub enabled: bool,
    /// Allow plain HTTP / self-signed TLS against this registry.
    pub insecure: bool,
    pub created_at: i64,
}

pub struct RegistryCredentialStore;

const CREDENTIAL_COLUMNS: &str = "id, registry_host, username, token, enabled, insecure, created_at";

impl RegistryCredentialStore {
    pub fn new() -> Self {
        Self
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<RegistryCredential>> {
        let mut stmt = conn.prepare(&format!("SELECT {CREDENTIAL_COLUMNS} FROM registry_credentials"))?;
        let rows = stmt.query_map([], Self::row_to_credential)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn for_host(&self, conn: &Connection, host: &str) -> DatabaseResult<Option<RegistryCredential>> {
        let result = conn.query_row(
            &format!("SELECT {CREDENTIAL_COLUMNS} FROM registry_credentials WHERE registry_host = ?1 AND enabled = 1"),
            [host],
            Self::row_to_credential,
        );

        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert(&self, conn: &Connection, c: &RegistryCredential) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO registry_credentials (id, registry_host, username, token, enabled, insecure, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                registry_host = excluded.registry_host,
                username = excluded.username,
                token = excluded.token,
                enabled = excluded.enabled,
                insecure = excluded.insecure
            "#,
            rusqlite::params![c.id, c.registry_host, c.username, c.token, c.enabled, c.insecure, c.created_at],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<()> {
        conn.execute("DELETE FROM registry_credentials WHERE id = ?1", [id])?;
        Ok(())
    }

    fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<RegistryCredential> {
        Ok(RegistryCredential {
            id: row.get(0)?,
            registry_host: row.get(1)?,
            username: row.get(2)?,
            token: row.get(3)?,
            enabled: row.get(4)?,
            insecure: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl Default for RegistryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
