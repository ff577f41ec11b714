//! Token vault using AES-256-GCM
//!
//! This module provides encryption and decryption for access tokens and
//! refresh tokens stored in the database, using AES-256-GCM with additional
//! authenticated data (AAD) binding each ciphertext to its connection tuple.
//! The 32-byte key is provisioned by the deployment's key management service
//! and delivered through configuration.
//!
//! Decryption fails closed: a tampered, truncated or unversioned payload is
//! always an error, never plaintext.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Prepend version byte and nonce to ciphertext
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Payloads without the version marker are rejected outright; the vault
    // never returns unauthenticated bytes as plaintext.
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Err(CryptoError::InvalidFormat);
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Token vault binding ciphertexts to their connection tuple through AAD.
#[derive(Debug, Clone)]
pub struct TokenVault {
    key: CryptoKey,
}

impl TokenVault {
    pub fn new(key: CryptoKey) -> Self {
        Self { key }
    }

    /// AAD for a connection tuple. The components are exactly the fields of
    /// the upsert key, so they never change for a stored row.
    pub fn aad(
        user_id: &Uuid,
        tenant_id: &Uuid,
        provider_slug: &str,
        provider_user_id: &str,
    ) -> String {
        format!(
            "{}|{}|{}|{}",
            user_id, tenant_id, provider_slug, provider_user_id
        )
    }

    /// Encrypt a token string under the connection-scoped AAD.
    pub fn encrypt_token(&self, aad: &str, token: &str) -> Result<Vec<u8>, CryptoError> {
        encrypt_bytes(&self.key, aad.as_bytes(), token.as_bytes())
    }

    /// Decrypt a token ciphertext under the connection-scoped AAD.
    pub fn decrypt_token(&self, aad: &str, ciphertext: &[u8]) -> Result<String, CryptoError> {
        let bytes = decrypt_bytes(&self.key, aad.as_bytes(), ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    }
}
