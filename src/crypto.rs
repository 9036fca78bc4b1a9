//! Token vault using AES-256-GCM
//!
//! Seals OAuth token sets for storage with additional authenticated data (AAD)
//! binding each blob to its connection, and issues CSRF state tokens.
//!
//! Blob layout: `version (1) || nonce (12) || ciphertext || tag (16)`.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::adapters::TokenSet;
use crate::models::Platform;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

const KEY_LEN: usize = 32;
const HEX_KEY_LEN: usize = KEY_LEN * 2;
const KDF_SALT: &[u8] = b"launchgate.token-vault.v1";
const KDF_ROUNDS: u32 = 100_000;
const STATE_TOKEN_BYTES: usize = 32;

/// Vault error types
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault secret is not configured")]
    MissingSecret,
    #[error("vault key is invalid: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("authentication tag did not verify")]
    Decryption,
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("decrypted payload is not a token set: {0}")]
    InvalidPayload(String),
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct VaultKey([u8; KEY_LEN]);

/// Symmetric vault for credential material at rest.
///
/// The key is derived once when the vault is built and never leaves this type.
#[derive(Clone)]
pub struct TokenVault {
    key: VaultKey,
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault").field("key", &"[REDACTED]").finish()
    }
}

impl TokenVault {
    /// Build a vault from the configured secret.
    ///
    /// A secret of exactly 64 hex characters is used directly as key bytes; anything
    /// else is stretched with PBKDF2-HMAC-SHA256 over a fixed application salt.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, VaultError> {
        let secret = secret
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(VaultError::MissingSecret)?;

        let mut key = [0u8; KEY_LEN];
        if secret.len() == HEX_KEY_LEN && secret.bytes().all(|b| b.is_ascii_hexdigit()) {
            let decoded = Zeroizing::new(
                hex::decode(secret).map_err(|e| VaultError::InvalidKey(e.to_string()))?,
            );
            key.copy_from_slice(&decoded);
        } else {
            pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
        }

        let vault = Self { key: VaultKey(key) };
        key.zeroize();
        Ok(vault)
    }

    /// Encrypt bytes; every call draws a fresh random nonce
    pub fn encrypt(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
        result.push(VERSION_ENCRYPTED);
        result.extend_from_slice(&nonce);
        result.append(&mut ciphertext);

        Ok(result)
    }

    /// Decrypt a blob produced by [`TokenVault::encrypt`].
    ///
    /// Anything that is not a well-formed, authenticated blob fails; there is no
    /// plaintext fallback.
    pub fn decrypt(&self, aad: &[u8], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if blob.len() < MIN_ENCRYPTED_LEN || blob[0] != VERSION_ENCRYPTED {
            return Err(VaultError::InvalidFormat);
        }

        let nonce = Nonce::from_slice(&blob[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
        let sealed = &blob[VERSION_FIELD_LEN + NONCE_LEN..];

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key.0));
        cipher
            .decrypt(nonce, Payload { msg: sealed, aad })
            .map(Zeroizing::new)
            .map_err(|_| VaultError::Decryption)
    }

    /// Serialize and seal a token set for one connection
    pub fn seal_token_set(
        &self,
        connection_id: Uuid,
        platform: Platform,
        tokens: &TokenSet,
    ) -> Result<Vec<u8>, VaultError> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(tokens).map_err(|e| VaultError::EncryptionFailed(e.to_string()))?,
        );
        self.encrypt(connection_aad(connection_id, platform).as_bytes(), &plaintext)
    }

    /// Open a sealed token set; tampering or a foreign connection's blob fails
    pub fn open_token_set(
        &self,
        connection_id: Uuid,
        platform: Platform,
        blob: &[u8],
    ) -> Result<TokenSet, VaultError> {
        let plaintext = self.decrypt(connection_aad(connection_id, platform).as_bytes(), blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::InvalidPayload(e.to_string()))
    }
}

/// AAD binding a credential blob to the row it was sealed for
fn connection_aad(connection_id: Uuid, platform: Platform) -> String {
    format!("{}|{}", connection_id, platform.as_str())
}

/// High-entropy, URL-safe CSRF state token (256 bits)
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let token = base64_url::encode(&bytes);
    bytes.zeroize();
    token
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(blob: &[u8]) -> bool {
    blob.len() >= MIN_ENCRYPTED_LEN && blob[0] == VERSION_ENCRYPTED
}
