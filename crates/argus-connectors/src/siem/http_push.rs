//! Generic HTTP-push SIEM sink.
//!
//! Posts payloads as JSON to a collector endpoint (Elastic-style ingest,
//! generic webhook collectors). Authentication comes from the shared
//! client's [`AuthConfig`](crate::traits::AuthConfig).

use super::{SiemPayload, SiemSink};
use crate::http::{HttpClient, HttpConfig};
use crate::traits::ConnectorResult;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Configuration for the HTTP-push sink.
#[derive(Debug, Clone)]
pub struct HttpPushSinkConfig {
    /// Shared HTTP configuration (base URL, auth, timeout, retries).
    pub http: HttpConfig,
    /// Path the payloads are posted to.
    pub ingest_path: String,
}

impl HttpPushSinkConfig {
    /// Creates a config posting to `/ingest` on the given base URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: HttpConfig::new(name, base_url),
            ingest_path: "/ingest".to_string(),
        }
    }
}

/// SIEM sink that POSTs each payload as a JSON document.
pub struct HttpPushSink {
    config: HttpPushSinkConfig,
    client: HttpClient,
}

impl HttpPushSink {
    /// Creates the sink, building its HTTP client.
    pub fn new(config: HttpPushSinkConfig) -> ConnectorResult<Self> {
        let client = HttpClient::new(config.http.clone())?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SiemSink for HttpPushSink {
    fn name(&self) -> &str {
        &self.config.http.name
    }

    #[instrument(skip(self, payload), fields(sink = %self.name()))]
    async fn deliver(&self, payload: &SiemPayload) -> ConnectorResult<()> {
        let body = serde_json::to_value(payload)
            .map_err(|e| crate::traits::ConnectorError::InvalidResponse(e.to_string()))?;
        self.client
            .post_json(&self.config.ingest_path, &body, &[])
            .await?;
        debug!(payload_id = %payload.id, "Delivered payload to SIEM");
        Ok(())
    }
}
