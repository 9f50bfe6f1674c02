//! Shared HTTP client for outbound adapters.
//!
//! Every network adapter (SIEM sinks, webhook notifier, HTTP vault) goes
//! through this client so timeouts, auth header injection, and bounded
//! retry behave the same everywhere.

use crate::traits::{AuthConfig, ConnectorError, ConnectorResult};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Adapter name, used in logs.
    pub name: String,
    /// Base URL; request paths are appended to it.
    pub base_url: String,
    /// Authentication applied to every request.
    pub auth: AuthConfig,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Retries after the initial attempt, for 5xx and transport errors.
    pub max_retries: u32,
}

impl HttpConfig {
    /// Creates a config with no auth, a 10 second timeout, and 2 retries.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            timeout_secs: 10,
            max_retries: 2,
        }
    }

    /// Sets the auth configuration.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }
}

/// HTTP client with auth injection and bounded retry.
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    /// Builds a client from the config.
    pub fn new(config: HttpConfig) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Returns the adapter name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => builder,
            AuthConfig::ApiKey { key, header_name } => {
                builder.header(header_name.as_str(), key.expose())
            }
            AuthConfig::BearerToken { token } => builder.bearer_auth(token.expose()),
        }
    }

    /// Sends a request with optional JSON body and extra headers, retrying
    /// transport errors and 5xx responses with linear backoff. Returns the
    /// final status and parsed JSON body (`null` when the body is empty or
    /// not JSON).
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, String)],
    ) -> ConnectorResult<(StatusCode, serde_json::Value)> {
        let url = self.url(path);
        let mut last_error = ConnectorError::ConnectionFailed("no attempt made".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                debug!(adapter = %self.config.name, attempt, "Retrying request");
            }

            let mut builder = self.client.request(method.clone(), &url);
            builder = self.apply_auth(builder);
            for (name, value) in headers {
                builder = builder.header(*name, value.as_str());
            }
            if let Some(json) = body {
                builder = builder.json(json);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_error = ConnectorError::RequestFailed {
                            status: status.as_u16(),
                            body: truncate(&text),
                        };
                        continue;
                    }
                    let parsed = response
                        .json::<serde_json::Value>()
                        .await
                        .unwrap_or(serde_json::Value::Null);
                    return Ok((status, parsed));
                }
                Err(e) if e.is_timeout() => {
                    last_error = ConnectorError::Timeout(self.config.timeout_secs);
                }
                Err(e) => {
                    last_error = ConnectorError::ConnectionFailed(e.to_string());
                }
            }
        }

        warn!(adapter = %self.config.name, "Request to {} exhausted retries: {}", url, last_error);
        Err(last_error)
    }

    /// POSTs a JSON body, treating any non-2xx status as an error.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        headers: &[(&str, String)],
    ) -> ConnectorResult<serde_json::Value> {
        let (status, value) = self
            .request_json(Method::POST, path, Some(body), headers)
            .await?;
        if !status.is_success() {
            return Err(ConnectorError::RequestFailed {
                status: status.as_u16(),
                body: truncate(&value.to_string()),
            });
        }
        Ok(value)
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 256;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
