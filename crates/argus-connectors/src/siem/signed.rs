//! API-key SIEM sink with HMAC body signing.
//!
//! For collectors that verify payload integrity (Splunk-HEC-style token
//! endpoints with signature verification): each request carries the API
//! key header plus an `X-Argus-Signature` header holding the hex
//! HMAC-SHA256 of the exact JSON body.

use super::{SiemPayload, SiemSink};
use crate::http::{HttpClient, HttpConfig};
use crate::secure_string::SecureString;
use crate::traits::{AuthConfig, ConnectorError, ConnectorResult};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Argus-Signature";

/// Configuration for the signed sink.
#[derive(Debug, Clone)]
pub struct SignedSinkConfig {
    /// Sink name.
    pub name: String,
    /// Collector base URL.
    pub base_url: String,
    /// Ingest path.
    pub ingest_path: String,
    /// API key sent on every request.
    pub api_key: SecureString,
    /// Header carrying the API key.
    pub api_key_header: String,
    /// HMAC signing secret.
    pub signing_secret: SecureString,
}

/// SIEM sink authenticating with an API key and signing each body.
pub struct SignedSink {
    config: SignedSinkConfig,
    client: HttpClient,
}

impl SignedSink {
    /// Creates the sink, building its HTTP client.
    pub fn new(config: SignedSinkConfig) -> ConnectorResult<Self> {
        if config.signing_secret.is_empty() {
            return Err(ConnectorError::ConfigError(
                "signing secret must not be empty".to_string(),
            ));
        }
        let http = HttpConfig::new(config.name.clone(), config.base_url.clone()).with_auth(
            AuthConfig::ApiKey {
                key: config.api_key.clone(),
                header_name: config.api_key_header.clone(),
            },
        );
        let client = HttpClient::new(http)?;
        Ok(Self { config, client })
    }

    /// Computes the hex HMAC-SHA256 signature of a serialized body.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.expose().as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl SiemSink for SignedSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self, payload), fields(sink = %self.name()))]
    async fn deliver(&self, payload: &SiemPayload) -> ConnectorResult<()> {
        let body = serde_json::to_value(payload)
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        // Sign the exact serialization that goes on the wire.
        let serialized =
            serde_json::to_vec(&body).map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        let signature = self.sign(&serialized);

        self.client
            .post_json(
                &self.config.ingest_path,
                &body,
                &[(SIGNATURE_HEADER, signature)],
            )
            .await?;
        debug!(payload_id = %payload.id, "Delivered signed payload to SIEM");
        Ok(())
    }
}
