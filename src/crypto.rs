//! At-rest encryption for secrets persisted to the database
//!
//! Registry credential tokens and agent pairing tokens are stored as
//! AES-256-GCM ciphertext, never plaintext. API key tokens take a different
//! path entirely — they're hashed with SHA-256 and the plaintext is shown to
//! the user exactly once, never stored at all (see `database::apikeys`).

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: ciphertext invalid or key mismatch")]
    Decrypt,

    #[error("malformed ciphertext encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext too short to contain a nonce")]
    Truncated,

    #[error("io error loading encryption key: {0}")]
    Io(#[from] std::io::Error),
}

/// Load the master encryption key from `<data_dir>/.encryption_key`,
/// generating and persisting a fresh random one on first boot. Per §6 the
/// key lives alongside the config database in the process's data directory,
/// not in the TOML configuration file itself.
pub fn load_or_create_master_key(data_dir: &Path) -> Result<String, CryptoError> {
    let key_path = data_dir.join(".encryption_key");

    if let Ok(existing) = std::fs::read_to_string(&key_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let encoded = BASE64.encode(raw);
    std::fs::write(&key_path, &encoded)?;
    Ok(encoded)
}

/// Encrypts/decrypts at-rest secrets with a single key derived from the
/// daemon's configured master key. Holding one `Vault` per process (rather
/// than per call) avoids re-deriving the key on every credential read.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Derive a 256-bit key from an arbitrary-length master secret via
    /// SHA-256, the same "stretch whatever the operator gave us" approach
    /// the teacher uses for webhook signing secrets.
    pub fn new(master_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(master_key.as_bytes());
        let key_bytes = hasher.finalize();

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Encrypt `plaintext`, returning base64(`nonce || ciphertext`).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|_| CryptoError::Encrypt)?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let payload = BASE64.decode(encoded)?;
        if payload.len() < 12 {
            return Err(CryptoError::Truncated);
        }

        let (nonce_bytes, ciphertext) = payload.split_at(12);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

/// SHA-256 hex digest, used for API key storage (`database::apikeys`) where
/// we never need to recover the plaintext, only compare against it.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let vault = Vault::new("test-master-key");
        let ciphertext = vault.encrypt("super-secret-token").unwrap();
        assert_ne!(ciphertext, "super-secret-token");
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "super-secret-token");
    }

    #[test]
    fn test_wrong_key_fails() {
        let vault_a = Vault::new("key-a");
        let vault_b = Vault::new("key-b");

        let ciphertext = vault_a.encrypt("secret").unwrap();
        assert!(vault_b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
    }
}
