//! Vault adapter: versioned named-secret CRUD.
//!
//! The [`VaultClient`] trait is the only way Argus touches secret values.
//! The in-memory implementation satisfies the identical contract (same
//! errors, same versioning) so everything above it is testable without a
//! live vault.

mod http;
mod memory;

pub use http::{HttpVault, HttpVaultConfig};
pub use memory::InMemoryVault;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from vault operations.
///
/// Not-found and conflict are distinct typed variants so callers branch
/// on the enum instead of string matching.
#[derive(Debug, Error, Clone)]
pub enum VaultError {
    /// No secret with this name exists.
    #[error("Secret not found: {0}")]
    NotFound(String),

    /// A secret with this name already exists.
    #[error("Secret already exists: {0}")]
    AlreadyExists(String),

    /// The vault backend was unreachable or rejected the operation.
    #[error("Vault access error: {0}")]
    Access(String),
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Classification of a stored secret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    DatabaseCredential,
    EncryptionKey,
    Token,
    Certificate,
    Generic,
}

impl Default for SecretType {
    fn default() -> Self {
        SecretType::Generic
    }
}

/// Metadata carried with every secret version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Secret name.
    pub name: String,
    /// Version id; every mutation produces a new one.
    pub version: u64,
    /// Secret classification.
    pub secret_type: SecretType,
    /// Free-form tags.
    pub tags: HashMap<String, String>,
    /// When this secret was first created.
    pub created_at: DateTime<Utc>,
    /// When the secret expires, if it does.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SecretMetadata {
    /// Creates version-0 metadata; the vault assigns the real version on
    /// write.
    pub fn new(name: impl Into<String>, secret_type: SecretType) -> Self {
        Self {
            name: name.into(),
            version: 0,
            secret_type,
            tags: HashMap::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// CRUD over an external vault of versioned, named secrets.
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Reads the current value and metadata of a secret.
    async fn get_secret(&self, name: &str) -> VaultResult<(String, SecretMetadata)>;

    /// Writes a secret value, creating it if absent. Returns the new
    /// version id. The stored metadata keeps the original `created_at` on
    /// updates.
    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        metadata: SecretMetadata,
    ) -> VaultResult<u64>;

    /// Deletes a secret and all its versions.
    async fn delete_secret(&self, name: &str) -> VaultResult<()>;

    /// Lists metadata for secrets whose names start with `prefix`.
    async fn list_secrets(&self, prefix: &str) -> VaultResult<Vec<SecretMetadata>>;
}
