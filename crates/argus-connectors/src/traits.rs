//! Shared connector types: errors, health, and authentication.

use crate::secure_string::SecureString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    /// Could not reach the remote endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote endpoint rejected the request.
    #[error("Request failed with status {status}: {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The response could not be parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request did not complete in time.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// The connector configuration is unusable.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The remote endpoint asked us to back off.
    #[error("Rate limited")]
    RateLimited,
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health of a sink or adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkHealth {
    /// Operating normally.
    Healthy,
    /// Functional but impaired.
    Degraded(String),
    /// Not operational.
    Unhealthy(String),
}

/// Authentication configuration for outbound requests.
///
/// Credential fields use [`SecureString`] so key material is zeroized
/// from memory when the configuration is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// Static API key sent in a named header.
    ApiKey {
        /// The API key (zeroized on drop).
        key: SecureString,
        /// Header to carry the key.
        header_name: String,
    },
    /// Bearer token in the Authorization header.
    BearerToken {
        /// The token (zeroized on drop).
        token: SecureString,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::RequestFailed {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_auth_config_serde_is_tagged() {
        let auth = AuthConfig::ApiKey {
            key: SecureString::new("k"),
            header_name: "X-Api-Key".to_string(),
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], serde_json::json!("api_key"));
    }
}
