//! Credential vault
//!
//! Gateway credentials are stored as `nonce || ciphertext || tag` produced by
//! ChaCha20-Poly1305. Keys are 32 bytes; key storage and rotation are owned by
//! whoever configures the server.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Required key size in bytes
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes, prepended to every sealed blob
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key size: must be {KEY_SIZE} bytes")]
    InvalidKeySize,

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Returned for every decryption failure, whatever the cause.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("failed to serialize credentials: {0}")]
    Serialization(String),
}

/// Credentials used to authenticate against a remote gateway control API
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCredentials {
    pub username: String,
    pub password: String,
}

impl GatewayCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeySize);
    }
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize)
}

/// Encrypt credentials with a fresh random nonce.
pub fn encrypt_credentials(
    credentials: &GatewayCredentials,
    key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let plaintext = serde_json::to_vec(credentials)
        .map_err(|err| CryptoError::Serialization(err.to_string()))?;

    let mut nonce_bytes = [0_u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|_| CryptoError::Serialization("encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt_credentials`].
pub fn decrypt_credentials(
    encrypted: &[u8],
    key: &[u8],
) -> Result<GatewayCredentials, CryptoError> {
    let cipher = cipher_for(key)?;
    if encrypted.len() < NONCE_SIZE {
        return Err(CryptoError::InvalidCiphertext);
    }

    let (nonce_bytes, sealed) = encrypted.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CryptoError::InvalidCiphertext)?;

    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::InvalidCiphertext)
}

/// Generate a fresh random key.
pub fn generate_encryption_key() -> [u8; KEY_SIZE] {
    let mut key = [0_u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Parse a hex encoded key, as found in configuration.
pub fn parse_encryption_key(encoded: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|err| CryptoError::InvalidKeyEncoding(err.to_string()))?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKeySize)
}
