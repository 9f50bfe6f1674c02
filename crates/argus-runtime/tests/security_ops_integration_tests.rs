//! End-to-end tests over the assembled security operations context.

use argus_connectors::{MockNotifier, MockSiemSink};
use argus_core::{
    EnvelopeCipher, KeyRegistry, SecurityEvent, SecurityEventType, Severity,
};
use argus_ledger::{AuditAction, AuditQuery};
use argus_runtime::{SecurityOps, SecurityOpsBuilder, SecurityOpsConfig};
use argus_secrets::{
    InMemoryVault, RevocationReason, RevocationStatus, SecretType, VaultClient, VaultError,
};
use std::collections::HashMap;
use std::sync::Arc;

struct Fixture {
    ops: SecurityOps,
    vault: Arc<InMemoryVault>,
    siem: Arc<MockSiemSink>,
    notifier: Arc<MockNotifier>,
}

async fn fixture() -> Fixture {
    let keys = Arc::new(KeyRegistry::new("k1", EnvelopeCipher::generate()));
    let vault = Arc::new(InMemoryVault::new());
    let siem = Arc::new(MockSiemSink::new("test-siem"));
    let notifier = Arc::new(MockNotifier::new());

    let mut config = SecurityOpsConfig::standard();
    config.ledger.mirror_to_log = false;

    let ops = SecurityOpsBuilder::new(keys)
        .config(config)
        .vault(vault.clone())
        .siem_sink(siem.clone())
        .notifier(notifier.clone())
        .build()
        .await;

    Fixture {
        ops,
        vault,
        siem,
        notifier,
    }
}

fn brute_force(user: &str, ip: &str) -> SecurityEvent {
    SecurityEvent::new(SecurityEventType::BruteForceDetected, Severity::Critical)
        .with_user(user)
        .with_source_ip(ip.parse().unwrap())
}

#[tokio::test]
async fn test_event_fans_out_to_every_consumer() {
    let f = fixture().await;

    f.ops.report_event(brute_force("mallory", "203.0.113.9")).await;

    // Anomaly detector built a baseline for the actor.
    assert!(f.ops.anomaly().baseline("mallory").await.is_some());

    // Alert manager raised exactly one critical alert.
    let alerts = f.ops.alerts().alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);

    // Threat responder blocked the source IP.
    assert!(f
        .ops
        .responder()
        .is_ip_blocked("203.0.113.9".parse().unwrap())
        .await);

    // SIEM sink received the event.
    assert_eq!(f.siem.delivered_count(), 1);

    // The incident audit entry exists once the ledger flushes.
    f.ops.stop().await;
    let page = f
        .ops
        .ledger()
        .query(AuditQuery {
            action: Some(AuditAction::Custom("threat_response".to_string())),
            ..AuditQuery::default()
        })
        .await;
    assert_eq!(page.entries.len(), 1);
}

#[tokio::test]
async fn test_duplicate_critical_events_alert_once() {
    let f = fixture().await;
    f.ops.report_event(brute_force("mallory", "203.0.113.9")).await;
    f.ops.report_event(brute_force("mallory", "203.0.113.9")).await;

    assert_eq!(f.ops.alerts().alerts().await.len(), 1);
    assert_eq!(f.ops.alerts().suppressed_count().await, 1);
    // Both events still reached the SIEM sink.
    assert_eq!(f.siem.delivered_count(), 2);
}

#[tokio::test]
async fn test_events_land_in_ledger_after_stop() {
    let f = fixture().await;
    for i in 0..5 {
        f.ops
            .report_event(
                SecurityEvent::new(SecurityEventType::DataAccess, Severity::Info)
                    .with_user(format!("user-{}", i)),
            )
            .await;
    }
    f.ops.stop().await;

    let page = f
        .ops
        .ledger()
        .query(AuditQuery {
            action: Some(AuditAction::SecurityEvent),
            ..AuditQuery::default()
        })
        .await;
    assert_eq!(page.entries.len(), 5);

    // The chain over everything written so far verifies.
    let verified = f.ops.ledger().verify_chain().await.unwrap();
    assert!(verified >= 5);
}

#[tokio::test]
async fn test_revocation_flow_drives_vault_and_ledger() {
    let f = fixture().await;
    f.vault
        .set_secret(
            "api-key",
            "value",
            argus_secrets::SecretMetadata::new("api-key", SecretType::ApiKey),
        )
        .await
        .unwrap();

    let record = f
        .ops
        .revocation()
        .request_revocation(
            "analyst",
            "api-key",
            RevocationReason::Compromised,
            Severity::Emergency,
            true,
            vec!["oncall@dispatch.example".to_string()],
        )
        .await;
    assert_eq!(record.status, RevocationStatus::Pending);
    assert!(f.vault.get_secret("api-key").await.is_ok());

    let approved = f
        .ops
        .revocation()
        .approve_revocation(record.id, "soc-lead")
        .await
        .unwrap();
    assert_eq!(approved.status, RevocationStatus::Completed);
    assert!(matches!(
        f.vault.get_secret("api-key").await,
        Err(VaultError::NotFound(_))
    ));

    f.ops.stop().await;
    let page = f
        .ops
        .ledger()
        .query(AuditQuery {
            action: Some(AuditAction::SecretRevoke),
            correlation_id: Some(record.id),
            ..AuditQuery::default()
        })
        .await;
    assert_eq!(page.entries.len(), 1);
    assert!(page.entries[0].outcome.is_success());

    assert_eq!(f.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_suspicious_secret_access_triggers_revocation() {
    let f = fixture().await;
    f.vault
        .set_secret(
            "svc-token",
            "v",
            argus_secrets::SecretMetadata::new("svc-token", SecretType::Token),
        )
        .await
        .unwrap();

    let event = SecurityEvent::new(SecurityEventType::SecretAccess, Severity::Critical)
        .with_user("mallory")
        .with_detail("secret_name", serde_json::json!("svc-token"));
    f.ops.report_event(event).await;

    // The responder filed and executed an immediate revocation.
    assert!(matches!(
        f.vault.get_secret("svc-token").await,
        Err(VaultError::NotFound(_))
    ));
    let records = f.ops.revocation().records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RevocationStatus::Completed);

    // Routine reads do not revoke.
    f.vault
        .set_secret(
            "other-token",
            "v",
            argus_secrets::SecretMetadata::new("other-token", SecretType::Token),
        )
        .await
        .unwrap();
    let routine = SecurityEvent::new(SecurityEventType::SecretAccess, Severity::Info)
        .with_user("service-a")
        .with_detail("secret_name", serde_json::json!("other-token"));
    f.ops.report_event(routine).await;
    assert!(f.vault.get_secret("other-token").await.is_ok());
}

#[tokio::test]
async fn test_secret_lifecycle_is_audited() {
    let f = fixture().await;
    f.ops
        .secrets()
        .create_secret(
            "ops",
            "db-cred",
            "v1",
            SecretType::DatabaseCredential,
            HashMap::new(),
            None,
        )
        .await
        .unwrap();
    f.ops
        .secrets()
        .rotate_secret("ops", "db-cred", "v2")
        .await
        .unwrap();
    f.ops.stop().await;

    let create = f
        .ops
        .ledger()
        .query(AuditQuery {
            action: Some(AuditAction::SecretCreate),
            ..AuditQuery::default()
        })
        .await;
    assert_eq!(create.entries.len(), 1);

    let rotate = f
        .ops
        .ledger()
        .query(AuditQuery {
            action: Some(AuditAction::SecretRotate),
            ..AuditQuery::default()
        })
        .await;
    assert_eq!(rotate.entries.len(), 1);

    // The ledger chain stays verifiable across the mixed traffic.
    f.ops.ledger().verify_chain().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_start_and_stop() {
    let f = fixture().await;
    f.ops.start().await.unwrap();

    let mut tasks = f.ops.running_tasks().await;
    tasks.sort();
    assert_eq!(
        tasks,
        vec![
            "alert-escalation",
            "collector-flush",
            "ledger-flush",
            "retention-sweep",
            "secret-rotation",
        ]
    );

    // Double start is refused while running.
    assert!(f.ops.start().await.is_err());

    f.ops.stop().await;
    assert!(f.ops.running_tasks().await.is_empty());

    // Stop is idempotent and the context can start again.
    f.ops.stop().await;
    f.ops.start().await.unwrap();
    f.ops.stop().await;
}

#[tokio::test]
async fn test_retention_sweep_leaves_young_entries() {
    let f = fixture().await;
    f.ops.report_event(brute_force("mallory", "203.0.113.9")).await;
    f.ops.stop().await;

    let before = f.ops.ledger().len().await;
    let report = f.ops.retention().run_sweep().await;
    assert_eq!(report.total_deleted(), 0);
    assert!(!report.has_errors());
    assert_eq!(f.ops.ledger().len().await, before);
}

#[tokio::test]
async fn test_reporting_over_live_traffic() {
    let f = fixture().await;
    f.ops.report_event(brute_force("mallory", "203.0.113.9")).await;
    f.ops
        .report_event(
            SecurityEvent::new(SecurityEventType::DataAccess, Severity::Info).with_user("alice"),
        )
        .await;
    f.ops.stop().await;

    let now = chrono::Utc::now();
    let report = f
        .ops
        .reporter()
        .generate(
            argus_ledger::ReportKind::SecuritySummary,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        )
        .await;

    assert!(report.errors.is_empty());
    let totals = &report.sections[0];
    // Two security events and one threat-response entry.
    assert_eq!(totals.data["entries"], serde_json::json!(3));
}
