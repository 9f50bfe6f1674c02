//! SIEM routing and compliance mapping.

use crate::alerts::Alert;
use crate::collector::{EventListener, ListenerError};
use argus_connectors::{PayloadKind, SiemPayload, SiemSink};
use argus_core::{SecurityEvent, SecurityEventType};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Reference to a compliance framework control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlReference {
    /// Framework name, e.g. `SOC2` or `ISO27001`.
    pub framework: String,
    /// Control identifier within the framework.
    pub control_id: String,
}

impl ControlReference {
    /// Creates a control reference.
    pub fn new(framework: impl Into<String>, control_id: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            control_id: control_id.into(),
        }
    }
}

/// Attaches framework control references to events by type.
///
/// An unmapped event type simply carries no references; that is expected,
/// not an error.
#[derive(Debug, Clone)]
pub struct ComplianceMapper {
    mappings: HashMap<SecurityEventType, Vec<ControlReference>>,
}

impl ComplianceMapper {
    /// Creates a mapper from an explicit table.
    pub fn new(mappings: HashMap<SecurityEventType, Vec<ControlReference>>) -> Self {
        Self { mappings }
    }

    /// The standard mapping table for the dispatch platform.
    pub fn standard() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(
            SecurityEventType::AuthenticationFailure,
            vec![
                ControlReference::new("SOC2", "CC6.1"),
                ControlReference::new("ISO27001", "A.9.4.2"),
            ],
        );
        mappings.insert(
            SecurityEventType::BruteForceDetected,
            vec![
                ControlReference::new("SOC2", "CC6.1"),
                ControlReference::new("PCI-DSS", "8.1.6"),
            ],
        );
        mappings.insert(
            SecurityEventType::PrivilegeEscalation,
            vec![
                ControlReference::new("SOC2", "CC6.3"),
                ControlReference::new("ISO27001", "A.9.2.3"),
            ],
        );
        mappings.insert(
            SecurityEventType::DataAccess,
            vec![ControlReference::new("SOC2", "CC6.7")],
        );
        mappings.insert(
            SecurityEventType::DataExport,
            vec![
                ControlReference::new("SOC2", "CC6.7"),
                ControlReference::new("ISO27001", "A.8.2.3"),
            ],
        );
        mappings.insert(
            SecurityEventType::ConfigurationChange,
            vec![ControlReference::new("SOC2", "CC8.1")],
        );
        mappings.insert(
            SecurityEventType::SecretAccess,
            vec![
                ControlReference::new("SOC2", "CC6.1"),
                ControlReference::new("ISO27001", "A.9.4.3"),
            ],
        );
        Self::new(mappings)
    }

    /// Controls for an event type; empty when unmapped.
    pub fn controls_for(&self, event_type: &SecurityEventType) -> &[ControlReference] {
        self.mappings
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for ComplianceMapper {
    fn default() -> Self {
        Self::standard()
    }
}

/// Fans events and alerts out to every configured SIEM sink.
pub struct SiemRouter {
    sinks: Vec<Arc<dyn SiemSink>>,
    mapper: ComplianceMapper,
}

impl SiemRouter {
    /// Creates a router over the given sinks.
    pub fn new(sinks: Vec<Arc<dyn SiemSink>>, mapper: ComplianceMapper) -> Self {
        Self { sinks, mapper }
    }

    /// Routes a security event to all sinks concurrently.
    ///
    /// Returns the per-sink success map; one sink's failure never blocks
    /// delivery to the others.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn route_event(&self, event: &SecurityEvent) -> HashMap<String, bool> {
        let mut payload = SiemPayload::new(
            PayloadKind::Event,
            event.id,
            event.timestamp,
            event.severity.to_string(),
            event.event_type.to_string(),
        )
        .with_field("event_type", serde_json::json!(event.event_type.to_string()))
        .with_field("outcome", serde_json::json!(event.outcome));
        if let Some(user) = &event.user_id {
            payload = payload.with_field("user_id", serde_json::json!(user));
        }
        if let Some(ip) = event.source_ip {
            payload = payload.with_field("source_ip", serde_json::json!(ip.to_string()));
        }
        if let Some(resource) = &event.resource {
            payload = payload.with_field("resource", serde_json::json!(resource));
        }

        let controls = self.mapper.controls_for(&event.event_type);
        if !controls.is_empty() {
            payload = payload.with_field("compliance_controls", serde_json::json!(controls));
        }

        self.deliver(payload).await
    }

    /// Routes an alert to all sinks concurrently.
    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    pub async fn route_alert(&self, alert: &Alert) -> HashMap<String, bool> {
        let mut payload = SiemPayload::new(
            PayloadKind::Alert,
            alert.id,
            alert.triggered_at,
            alert.severity.to_string(),
            alert.title.clone(),
        )
        .with_field("status", serde_json::json!(alert.status))
        .with_field("fingerprint", serde_json::json!(alert.fingerprint))
        .with_field(
            "escalation_count",
            serde_json::json!(alert.escalation_count),
        );
        if let Some(user) = &alert.user_id {
            payload = payload.with_field("user_id", serde_json::json!(user));
        }

        self.deliver(payload).await
    }

    async fn deliver(&self, payload: SiemPayload) -> HashMap<String, bool> {
        let deliveries = self.sinks.iter().map(|sink| {
            let payload = payload.clone();
            let sink = sink.clone();
            async move {
                let ok = match sink.deliver(&payload).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(sink = %sink.name(), "SIEM delivery failed: {}", e);
                        false
                    }
                };
                (sink.name().to_string(), ok)
            }
        });
        join_all(deliveries).await.into_iter().collect()
    }
}

#[async_trait]
impl EventListener for SiemRouter {
    fn name(&self) -> &str {
        "siem-router"
    }

    async fn on_event(&self, event: &SecurityEvent) -> Result<(), ListenerError> {
        self.route_event(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_connectors::MockSiemSink;
    use argus_core::Severity;

    fn event() -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::BruteForceDetected, Severity::Critical)
            .with_user("mallory")
            .with_source_ip("203.0.113.9".parse().unwrap())
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_sinks() {
        let a = Arc::new(MockSiemSink::new("a"));
        let b = Arc::new(MockSiemSink::new("b"));
        let router = SiemRouter::new(vec![a.clone(), b.clone()], ComplianceMapper::standard());

        let results = router.route_event(&event()).await;
        assert_eq!(results.len(), 2);
        assert!(results["a"]);
        assert!(results["b"]);
        assert_eq!(a.delivered_count(), 1);
        assert_eq!(b.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_one_sink_failure_does_not_block_others() {
        let failing = Arc::new(MockSiemSink::new("failing"));
        failing.set_fail(true);
        let healthy = Arc::new(MockSiemSink::new("healthy"));
        let router =
            SiemRouter::new(vec![failing.clone(), healthy.clone()], ComplianceMapper::standard());

        let results = router.route_event(&event()).await;
        assert!(!results["failing"]);
        assert!(results["healthy"]);
        assert_eq!(healthy.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_compliance_controls_attached() {
        let sink = Arc::new(MockSiemSink::new("s"));
        let router = SiemRouter::new(vec![sink.clone()], ComplianceMapper::standard());
        router.route_event(&event()).await;

        let delivered = sink.delivered();
        let controls = delivered[0].fields["compliance_controls"].as_array().unwrap();
        assert!(controls
            .iter()
            .any(|c| c["framework"] == "PCI-DSS" && c["control_id"] == "8.1.6"));
    }

    #[tokio::test]
    async fn test_unmapped_type_carries_no_controls() {
        let sink = Arc::new(MockSiemSink::new("s"));
        let router = SiemRouter::new(vec![sink.clone()], ComplianceMapper::standard());

        let unmapped =
            SecurityEvent::new(SecurityEventType::Custom("heartbeat".to_string()), Severity::Info);
        let results = router.route_event(&unmapped).await;
        assert!(results["s"]);

        let delivered = sink.delivered();
        assert!(!delivered[0].fields.contains_key("compliance_controls"));
    }

    #[tokio::test]
    async fn test_route_alert_payload() {
        use crate::alerts::{AlertConfig, AlertManager};

        let manager = AlertManager::new(AlertConfig::default());
        let id = manager.handle_event(&event()).await.unwrap();
        let alert = manager.alert(id).await.unwrap();

        let sink = Arc::new(MockSiemSink::new("s"));
        let router = SiemRouter::new(vec![sink.clone()], ComplianceMapper::standard());
        let results = router.route_alert(&alert).await;
        assert!(results["s"]);

        let delivered = sink.delivered();
        assert_eq!(delivered[0].kind, PayloadKind::Alert);
        assert_eq!(delivered[0].fields["fingerprint"], serde_json::json!(alert.fingerprint));
    }
}
