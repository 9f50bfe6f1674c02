//! In-memory vault double for tests and development.

use super::{SecretMetadata, VaultClient, VaultError, VaultResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

struct StoredSecret {
    value: String,
    metadata: SecretMetadata,
}

/// In-memory [`VaultClient`] with the same contract as a live vault:
/// monotonic versions per secret, typed not-found errors, and an
/// injectable access failure for exercising backend-error paths.
#[derive(Default)]
pub struct InMemoryVault {
    secrets: RwLock<HashMap<String, StoredSecret>>,
    fail_all: AtomicBool,
}

impl InMemoryVault {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with an access error.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> VaultResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(VaultError::Access("injected vault outage".to_string()));
        }
        Ok(())
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    /// True if no secrets are stored.
    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

#[async_trait]
impl VaultClient for InMemoryVault {
    async fn get_secret(&self, name: &str) -> VaultResult<(String, SecretMetadata)> {
        self.check_available()?;
        let secrets = self.secrets.read().await;
        secrets
            .get(name)
            .map(|s| (s.value.clone(), s.metadata.clone()))
            .ok_or_else(|| VaultError::NotFound(name.to_string()))
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        mut metadata: SecretMetadata,
    ) -> VaultResult<u64> {
        self.check_available()?;
        let mut secrets = self.secrets.write().await;
        let version = match secrets.get(name) {
            Some(existing) => {
                metadata.created_at = existing.metadata.created_at;
                existing.metadata.version + 1
            }
            None => 1,
        };
        metadata.name = name.to_string();
        metadata.version = version;
        secrets.insert(
            name.to_string(),
            StoredSecret {
                value: value.to_string(),
                metadata,
            },
        );
        Ok(version)
    }

    async fn delete_secret(&self, name: &str) -> VaultResult<()> {
        self.check_available()?;
        let mut secrets = self.secrets.write().await;
        secrets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VaultError::NotFound(name.to_string()))
    }

    async fn list_secrets(&self, prefix: &str) -> VaultResult<Vec<SecretMetadata>> {
        self.check_available()?;
        let secrets = self.secrets.read().await;
        let mut listed: Vec<SecretMetadata> = secrets
            .values()
            .filter(|s| s.metadata.name.starts_with(prefix))
            .map(|s| s.metadata.clone())
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::SecretType;

    #[tokio::test]
    async fn test_set_then_get() {
        let vault = InMemoryVault::new();
        let version = vault
            .set_secret(
                "db-password",
                "hunter2",
                SecretMetadata::new("db-password", SecretType::DatabaseCredential),
            )
            .await
            .unwrap();
        assert_eq!(version, 1);

        let (value, metadata) = vault.get_secret("db-password").await.unwrap();
        assert_eq!(value, "hunter2");
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.secret_type, SecretType::DatabaseCredential);
    }

    #[tokio::test]
    async fn test_versions_are_monotonic() {
        let vault = InMemoryVault::new();
        let meta = SecretMetadata::new("k", SecretType::ApiKey);
        assert_eq!(vault.set_secret("k", "v1", meta.clone()).await.unwrap(), 1);
        assert_eq!(vault.set_secret("k", "v2", meta.clone()).await.unwrap(), 2);
        assert_eq!(vault.set_secret("k", "v3", meta).await.unwrap(), 3);

        let (value, metadata) = vault.get_secret("k").await.unwrap();
        assert_eq!(value, "v3");
        assert_eq!(metadata.version, 3);
    }

    #[tokio::test]
    async fn test_created_at_survives_updates() {
        let vault = InMemoryVault::new();
        let meta = SecretMetadata::new("k", SecretType::ApiKey);
        vault.set_secret("k", "v1", meta).await.unwrap();
        let (_, first) = vault.get_secret("k").await.unwrap();

        let later = SecretMetadata::new("k", SecretType::ApiKey);
        vault.set_secret("k", "v2", later).await.unwrap();
        let (_, second) = vault.get_secret("k").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let vault = InMemoryVault::new();
        assert!(matches!(
            vault.get_secret("ghost").await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            vault.delete_secret("ghost").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_value() {
        let vault = InMemoryVault::new();
        let meta = SecretMetadata::new("k", SecretType::Token);
        vault.set_secret("k", "v", meta).await.unwrap();
        vault.delete_secret("k").await.unwrap();
        assert!(matches!(
            vault.get_secret("k").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let vault = InMemoryVault::new();
        for name in ["svc/a", "svc/b", "other/c"] {
            vault
                .set_secret(name, "v", SecretMetadata::new(name, SecretType::Generic))
                .await
                .unwrap();
        }

        let listed = vault.list_secrets("svc/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "svc/a");
        assert_eq!(listed[1].name, "svc/b");
    }

    #[tokio::test]
    async fn test_injected_outage() {
        let vault = InMemoryVault::new();
        vault
            .set_secret("k", "v", SecretMetadata::new("k", SecretType::Generic))
            .await
            .unwrap();
        vault.set_fail_all(true);
        assert!(matches!(
            vault.get_secret("k").await,
            Err(VaultError::Access(_))
        ));
        vault.set_fail_all(false);
        assert!(vault.get_secret("k").await.is_ok());
    }
}
