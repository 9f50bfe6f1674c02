//! SIEM sink trait and implementations.
//!
//! A sink accepts a generic structured [`SiemPayload`] and acknowledges
//! success or failure independently; the router in the pipeline crate fans
//! payloads out and collects per-sink results.

mod http_push;
mod mock;
mod signed;

pub use http_push::{HttpPushSink, HttpPushSinkConfig};
pub use mock::MockSiemSink;
pub use signed::{SignedSink, SignedSinkConfig};

use crate::traits::{ConnectorResult, SinkHealth};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What a payload represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A raw security event.
    Event,
    /// A triggered alert.
    Alert,
}

/// Generic structured envelope delivered to SIEM sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemPayload {
    /// Payload kind.
    pub kind: PayloadKind,
    /// Id of the originating event or alert.
    pub id: Uuid,
    /// When the event or alert occurred.
    pub timestamp: DateTime<Utc>,
    /// Severity as a lowercase string.
    pub severity: String,
    /// One-line summary.
    pub summary: String,
    /// Structured detail fields, including any compliance control
    /// references attached by the router.
    pub fields: HashMap<String, serde_json::Value>,
}

impl SiemPayload {
    /// Creates a payload with empty fields.
    pub fn new(
        kind: PayloadKind,
        id: Uuid,
        timestamp: DateTime<Utc>,
        severity: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id,
            timestamp,
            severity: severity.into(),
            summary: summary.into(),
            fields: HashMap::new(),
        }
    }

    /// Adds a detail field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// A destination for security telemetry.
#[async_trait]
pub trait SiemSink: Send + Sync {
    /// Sink name, unique within a router.
    fn name(&self) -> &str;

    /// Delivers one payload. Failure affects only this sink.
    async fn deliver(&self, payload: &SiemPayload) -> ConnectorResult<()>;

    /// Current sink health.
    fn health(&self) -> SinkHealth {
        SinkHealth::Healthy
    }
}
