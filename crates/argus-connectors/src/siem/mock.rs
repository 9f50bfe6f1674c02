//! Mock SIEM sink for tests.

use super::{SiemPayload, SiemSink};
use crate::traits::{ConnectorError, ConnectorResult, SinkHealth};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records every delivered payload; can be told to fail deliveries to
/// exercise partial-delivery paths.
pub struct MockSiemSink {
    name: String,
    delivered: Mutex<Vec<SiemPayload>>,
    fail: AtomicBool,
}

impl MockSiemSink {
    /// Creates a healthy mock sink.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Makes subsequent deliveries fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of everything delivered so far.
    pub fn delivered(&self) -> Vec<SiemPayload> {
        self.delivered.lock().expect("mock sink lock poisoned").clone()
    }

    /// Number of delivered payloads.
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().expect("mock sink lock poisoned").len()
    }
}

#[async_trait]
impl SiemSink for MockSiemSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, payload: &SiemPayload) -> ConnectorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectorError::ConnectionFailed(
                "injected delivery failure".to_string(),
            ));
        }
        self.delivered
            .lock()
            .expect("mock sink lock poisoned")
            .push(payload.clone());
        Ok(())
    }

    fn health(&self) -> SinkHealth {
        if self.fail.load(Ordering::SeqCst) {
            SinkHealth::Unhealthy("failing by request".to_string())
        } else {
            SinkHealth::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::siem::PayloadKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn payload() -> SiemPayload {
        SiemPayload::new(
            PayloadKind::Event,
            Uuid::new_v4(),
            Utc::now(),
            "critical",
            "test payload",
        )
    }

    #[tokio::test]
    async fn test_records_deliveries() {
        let sink = MockSiemSink::new("mock");
        sink.deliver(&payload()).await.unwrap();
        sink.deliver(&payload()).await.unwrap();
        assert_eq!(sink.delivered_count(), 2);
        assert_eq!(sink.health(), SinkHealth::Healthy);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let sink = MockSiemSink::new("mock");
        sink.set_fail(true);
        assert!(sink.deliver(&payload()).await.is_err());
        assert_eq!(sink.delivered_count(), 0);
        assert!(matches!(sink.health(), SinkHealth::Unhealthy(_)));
    }
}
