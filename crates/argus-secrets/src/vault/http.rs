//! HTTP vault adapter.
//!
//! Speaks a KV-style REST API: secrets live under `secrets/{name}` with a
//! JSON envelope carrying the value and metadata. Backend failures map
//! uniformly onto [`VaultError::Access`]; a 404 is a typed not-found.

use super::{SecretMetadata, VaultClient, VaultError, VaultResult};
use argus_connectors::{HttpClient, HttpConfig};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::instrument;

/// Configuration for the HTTP vault adapter.
#[derive(Debug, Clone)]
pub struct HttpVaultConfig {
    /// Shared HTTP configuration (base URL, bearer token, timeout).
    pub http: HttpConfig,
    /// Path prefix for the secrets API.
    pub mount_path: String,
}

impl HttpVaultConfig {
    /// Creates a config with the conventional `secrets` mount.
    pub fn new(http: HttpConfig) -> Self {
        Self {
            http,
            mount_path: "secrets".to_string(),
        }
    }
}

/// Live vault adapter over HTTP.
pub struct HttpVault {
    config: HttpVaultConfig,
    client: HttpClient,
}

impl HttpVault {
    /// Creates the adapter, building its HTTP client.
    pub fn new(config: HttpVaultConfig) -> VaultResult<Self> {
        let client =
            HttpClient::new(config.http.clone()).map_err(|e| VaultError::Access(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn secret_path(&self, name: &str) -> String {
        format!("{}/{}", self.config.mount_path, name)
    }

    fn parse_metadata(name: &str, value: &serde_json::Value) -> VaultResult<SecretMetadata> {
        serde_json::from_value(value.clone())
            .map_err(|e| VaultError::Access(format!("malformed metadata for {}: {}", name, e)))
    }
}

#[async_trait]
impl VaultClient for HttpVault {
    #[instrument(skip(self))]
    async fn get_secret(&self, name: &str) -> VaultResult<(String, SecretMetadata)> {
        let (status, body) = self
            .client
            .request_json(Method::GET, &self.secret_path(name), None, &[])
            .await
            .map_err(|e| VaultError::Access(e.to_string()))?;

        match status {
            StatusCode::NOT_FOUND => Err(VaultError::NotFound(name.to_string())),
            s if s.is_success() => {
                let value = body["data"]["value"]
                    .as_str()
                    .ok_or_else(|| {
                        VaultError::Access(format!("missing value in response for {}", name))
                    })?
                    .to_string();
                let metadata = Self::parse_metadata(name, &body["data"]["metadata"])?;
                Ok((value, metadata))
            }
            s => Err(VaultError::Access(format!("unexpected status {}", s))),
        }
    }

    #[instrument(skip(self, value, metadata))]
    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        metadata: SecretMetadata,
    ) -> VaultResult<u64> {
        let body = serde_json::json!({
            "data": {
                "value": value,
                "metadata": metadata,
            }
        });
        let (status, response) = self
            .client
            .request_json(Method::PUT, &self.secret_path(name), Some(&body), &[])
            .await
            .map_err(|e| VaultError::Access(e.to_string()))?;

        if !status.is_success() {
            return Err(VaultError::Access(format!(
                "write rejected with status {}",
                status
            )));
        }
        response["data"]["version"]
            .as_u64()
            .ok_or_else(|| VaultError::Access(format!("missing version in response for {}", name)))
    }

    #[instrument(skip(self))]
    async fn delete_secret(&self, name: &str) -> VaultResult<()> {
        let (status, _) = self
            .client
            .request_json(Method::DELETE, &self.secret_path(name), None, &[])
            .await
            .map_err(|e| VaultError::Access(e.to_string()))?;

        match status {
            StatusCode::NOT_FOUND => Err(VaultError::NotFound(name.to_string())),
            s if s.is_success() => Ok(()),
            s => Err(VaultError::Access(format!("unexpected status {}", s))),
        }
    }

    #[instrument(skip(self))]
    async fn list_secrets(&self, prefix: &str) -> VaultResult<Vec<SecretMetadata>> {
        let path = format!("{}?prefix={}", self.config.mount_path, prefix);
        let (status, body) = self
            .client
            .request_json(Method::GET, &path, None, &[])
            .await
            .map_err(|e| VaultError::Access(e.to_string()))?;

        if !status.is_success() {
            return Err(VaultError::Access(format!(
                "list rejected with status {}",
                status
            )));
        }
        let entries = body["data"]["secrets"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        entries
            .iter()
            .map(|entry| Self::parse_metadata(prefix, entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_path_uses_mount() {
        let vault = HttpVault::new(HttpVaultConfig::new(HttpConfig::new(
            "vault",
            "http://vault.internal:8200",
        )))
        .unwrap();
        assert_eq!(vault.secret_path("svc/api-key"), "secrets/svc/api-key");
    }

    #[test]
    fn test_metadata_parsing_rejects_garbage() {
        let result =
            HttpVault::parse_metadata("k", &serde_json::json!({"version": "not-a-number"}));
        assert!(matches!(result, Err(VaultError::Access(_))));
    }
}
