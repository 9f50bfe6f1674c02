//! AES-256-GCM envelope encryption.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

/// Nonce length for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;
/// Authentication tag length appended by aes-gcm (128 bits).
const TAG_LEN: usize = 16;

/// Minimum accepted PBKDF2 iteration count for password-derived keys.
pub const PBKDF2_MIN_ITERATIONS: u32 = 100_000;
/// Default PBKDF2 iteration count.
const PBKDF2_DEFAULT_ITERATIONS: u32 = 150_000;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The encryption key is invalid (wrong size, format, or derivation parameters).
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// The blob is malformed (bad base64, truncated, missing nonce).
    #[error("Invalid ciphertext blob: {0}")]
    InvalidBlob(String),

    /// Authentication tag verification failed: the ciphertext or its
    /// associated data has been tampered with.
    #[error("Ciphertext integrity check failed: tampering detected")]
    TamperDetected,

    /// No key with the given id is registered.
    #[error("Unknown key id: {0}")]
    UnknownKey(String),
}

/// AES-256-GCM cipher over a single key.
///
/// Blob format: `base64(nonce || ciphertext || tag)` with a fresh random
/// 96-bit nonce per call. Optional associated data is authenticated but
/// not stored; callers must supply the same AAD on decrypt.
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl EnvelopeCipher {
    /// Creates a cipher from a raw 32-byte key.
    pub fn new(key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is always valid");
        Self { cipher }
    }

    /// Generates a cipher with a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key);
        Self::new(key)
    }

    /// Creates a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self, CryptoError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        Ok(Self::new(key))
    }

    /// Derives a cipher from a password using PBKDF2-HMAC-SHA256.
    ///
    /// `iterations` of `None` uses the default (150,000); explicit values
    /// below [`PBKDF2_MIN_ITERATIONS`] are rejected.
    pub fn from_password(
        password: &str,
        salt: &[u8],
        iterations: Option<u32>,
    ) -> Result<Self, CryptoError> {
        let iterations = iterations.unwrap_or(PBKDF2_DEFAULT_ITERATIONS);
        if iterations < PBKDF2_MIN_ITERATIONS {
            return Err(CryptoError::InvalidKey(format!(
                "PBKDF2 iteration count {} is below the minimum {}",
                iterations, PBKDF2_MIN_ITERATIONS
            )));
        }
        if salt.len() < 8 {
            return Err(CryptoError::InvalidKey(
                "salt must be at least 8 bytes".to_string(),
            ));
        }

        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        Ok(Self::new(key))
    }

    /// Returns a new cipher instance over `new_key`.
    ///
    /// Rotation does not touch existing blobs; callers re-encrypt by
    /// decrypting with the old instance and encrypting with the new one.
    pub fn rotate(&self, new_key: [u8; 32]) -> Self {
        Self::new(new_key)
    }

    /// Encrypts `plaintext`, authenticating `aad` when provided.
    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: aad.unwrap_or(&[]),
        };

        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&combined))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed with [`CryptoError::TamperDetected`] on any tag
    /// mismatch, including a wrong or missing `aad`.
    pub fn decrypt(&self, blob: &str, aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let combined = BASE64
            .decode(blob)
            .map_err(|e| CryptoError::InvalidBlob(format!("invalid base64: {}", e)))?;

        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidBlob("blob too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let payload = Payload {
            msg: ciphertext,
            aad: aad.unwrap_or(&[]),
        };

        self.cipher
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::TamperDetected)
    }
}

/// Generates a random 16-byte salt for password key derivation.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill(&mut salt);
    salt
}
