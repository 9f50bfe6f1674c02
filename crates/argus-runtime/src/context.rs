//! The security operations context.

use argus_connectors::{MockNotifier, NotificationSink, SiemSink};
use argus_core::{KeyRegistry, SchedulerError, SecurityEvent, TaskSupervisor};
use argus_ledger::{
    AuditEntryDraft, AuditLedger, AuditLevel, AuditOutcome, AuditReporter, ColdStorage,
    InMemoryColdStorage, LedgerConfig, LedgerError, RetentionManager, RetentionPolicy,
};
use argus_pipeline::{
    AccountControl, AlertConfig, AlertManager, AnomalyConfig, AnomalyDetector, BlockIpAction,
    CollectorConfig, DisableUserAction, EventDrain, IncidentCallback, IpBlocklist,
    MockAccountControl, MockSessionRevoker, NotifyAction, RateLimitAction, ResponseRuleTable,
    SecurityEventCollector, SecurityIncident, SessionRevoker, SiemRouter, ThreatResponder,
    ComplianceMapper,
};
use argus_secrets::{
    EmergencyRevocation, InMemoryVault, RotationScheduler, SecretsManager, VaultClient,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors from the runtime lifecycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A background task could not be scheduled.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The context is already started.
    #[error("Security operations already started")]
    AlreadyStarted,
}

/// Intervals for the background tasks.
#[derive(Debug, Clone)]
pub struct TaskIntervals {
    /// Ledger buffer flush tick.
    pub ledger_flush: Duration,
    /// Collector buffer flush tick.
    pub collector_flush: Duration,
    /// Alert escalation sweep.
    pub escalation_sweep: Duration,
    /// Secret rotation tick.
    pub rotation_tick: Duration,
    /// Retention sweep.
    pub retention_sweep: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            ledger_flush: Duration::from_secs(5),
            collector_flush: Duration::from_secs(5),
            escalation_sweep: Duration::from_secs(60),
            rotation_tick: Duration::from_secs(3600),
            retention_sweep: Duration::from_secs(24 * 3600),
        }
    }
}

/// Top-level configuration for the subsystem.
#[derive(Debug, Clone, Default)]
pub struct SecurityOpsConfig {
    /// Ledger settings.
    pub ledger: LedgerConfig,
    /// Collector settings.
    pub collector: CollectorConfig,
    /// Anomaly detector settings.
    pub anomaly: AnomalyConfig,
    /// Alert manager settings.
    pub alerts: AlertConfig,
    /// Retention policies, evaluated in order.
    pub retention_policies: Vec<RetentionPolicy>,
    /// Background task intervals.
    pub intervals: TaskIntervals,
    /// Recipient for automated response notifications.
    pub notify_recipient: String,
    /// Temporary IP block duration for the standard response rules.
    pub ip_block_hours: i64,
}

impl SecurityOpsConfig {
    /// Configuration with sensible production defaults.
    pub fn standard() -> Self {
        Self {
            retention_policies: vec![RetentionPolicy::default_catch_all(2555)],
            notify_recipient: "secops@dispatch.example".to_string(),
            ip_block_hours: 1,
            ..Self::default()
        }
    }
}

/// Drains flushed collector batches into the audit ledger.
struct LedgerDrain {
    ledger: Arc<AuditLedger>,
}

#[async_trait]
impl EventDrain for LedgerDrain {
    async fn drain(&self, events: Vec<SecurityEvent>) {
        for event in &events {
            if let Err(e) = self.ledger.log_security_event(event).await {
                warn!(event_id = %event.id, "Failed to persist event to ledger: {}", e);
            }
        }
    }
}

/// Response action that files an immediate revocation for the secret a
/// suspicious event touched. The event must carry the secret name in its
/// `secret_name` detail.
struct RevokeSecretAction {
    revocation: Arc<EmergencyRevocation>,
    notify: Vec<String>,
}

#[async_trait]
impl argus_pipeline::ResponseAction for RevokeSecretAction {
    fn name(&self) -> &str {
        "revoke_secret"
    }

    async fn execute(&self, event: &SecurityEvent) -> argus_pipeline::ActionOutcome {
        let executed_at = chrono::Utc::now();
        if event.severity < argus_core::Severity::Critical {
            return argus_pipeline::ActionOutcome {
                action: self.name().to_string(),
                success: true,
                message: "severity below the revocation threshold, secret left in place"
                    .to_string(),
                executed_at,
            };
        }
        let Some(secret_name) = event.details.get("secret_name").and_then(|v| v.as_str()) else {
            return argus_pipeline::ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: "event carries no secret_name detail".to_string(),
                executed_at,
            };
        };

        let record = self
            .revocation
            .request_revocation(
                "threat-responder",
                secret_name,
                argus_secrets::RevocationReason::Compromised,
                event.severity,
                false,
                self.notify.clone(),
            )
            .await;

        argus_pipeline::ActionOutcome {
            action: self.name().to_string(),
            success: record.status == argus_secrets::RevocationStatus::Completed,
            message: format!(
                "revocation {} of {} finished {:?}",
                record.id, secret_name, record.status
            ),
            executed_at,
        }
    }
}

/// Audits every finished incident.
struct IncidentAuditCallback {
    ledger: Arc<AuditLedger>,
}

#[async_trait]
impl IncidentCallback for IncidentAuditCallback {
    async fn on_incident(&self, incident: &SecurityIncident) {
        let failed = incident
            .response_actions
            .iter()
            .filter(|a| !a.success)
            .count();
        let outcome = if failed == 0 {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure(format!("{} response action(s) failed", failed))
        };
        let draft = AuditEntryDraft::new(
            "threat-responder",
            argus_ledger::AuditAction::Custom("threat_response".to_string()),
            incident.id.to_string(),
            outcome,
        )
        .with_level(AuditLevel::Critical)
        .with_message(format!(
            "automated response executed {} action(s)",
            incident.response_actions.len()
        ))
        .with_metadata(
            "actions",
            serde_json::json!(incident
                .response_actions
                .iter()
                .map(|a| (&a.action, a.success))
                .collect::<Vec<_>>()),
        );
        if let Err(e) = self.ledger.log(draft).await {
            warn!(incident_id = %incident.id, "Failed to audit incident: {}", e);
        }
    }
}

/// Builder for [`SecurityOps`].
pub struct SecurityOpsBuilder {
    config: SecurityOpsConfig,
    keys: Arc<KeyRegistry>,
    vault: Option<Arc<dyn VaultClient>>,
    cold_storage: Option<Arc<dyn ColdStorage>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    siem_sinks: Vec<Arc<dyn SiemSink>>,
    session_revoker: Option<Arc<dyn SessionRevoker>>,
    account_control: Option<Arc<dyn AccountControl>>,
    compliance: Option<ComplianceMapper>,
}

impl SecurityOpsBuilder {
    /// Starts a builder over the key registry every encrypted payload
    /// will go through.
    pub fn new(keys: Arc<KeyRegistry>) -> Self {
        Self {
            config: SecurityOpsConfig::standard(),
            keys,
            vault: None,
            cold_storage: None,
            notifier: None,
            siem_sinks: Vec::new(),
            session_revoker: None,
            account_control: None,
            compliance: None,
        }
    }

    /// Overrides the configuration.
    pub fn config(mut self, config: SecurityOpsConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the vault backend. Defaults to [`InMemoryVault`].
    pub fn vault(mut self, vault: Arc<dyn VaultClient>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Sets the cold storage backend. Defaults to [`InMemoryColdStorage`].
    pub fn cold_storage(mut self, storage: Arc<dyn ColdStorage>) -> Self {
        self.cold_storage = Some(storage);
        self
    }

    /// Sets the notification sink. Defaults to [`MockNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Adds a SIEM sink.
    pub fn siem_sink(mut self, sink: Arc<dyn SiemSink>) -> Self {
        self.siem_sinks.push(sink);
        self
    }

    /// Sets the session layer used by the revoke-sessions action.
    pub fn session_revoker(mut self, revoker: Arc<dyn SessionRevoker>) -> Self {
        self.session_revoker = Some(revoker);
        self
    }

    /// Sets the identity layer used by the disable-user action.
    pub fn account_control(mut self, accounts: Arc<dyn AccountControl>) -> Self {
        self.account_control = Some(accounts);
        self
    }

    /// Overrides the compliance mapping table.
    pub fn compliance_mapper(mut self, mapper: ComplianceMapper) -> Self {
        self.compliance = Some(mapper);
        self
    }

    /// Wires everything together.
    pub async fn build(self) -> SecurityOps {
        let config = self.config;
        let ledger = Arc::new(AuditLedger::new(config.ledger.clone(), self.keys.clone()));
        let vault = self.vault.unwrap_or_else(|| Arc::new(InMemoryVault::new()));
        let cold_storage = self
            .cold_storage
            .unwrap_or_else(|| Arc::new(InMemoryColdStorage::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(MockNotifier::new()));

        let collector = Arc::new(SecurityEventCollector::new(config.collector.clone()));
        collector
            .set_drain(Arc::new(LedgerDrain {
                ledger: ledger.clone(),
            }))
            .await;

        let anomaly = Arc::new(AnomalyDetector::new(config.anomaly.clone()));
        let alerts = Arc::new(AlertManager::new(config.alerts.clone()));

        let blocklist = Arc::new(IpBlocklist::new());
        let revoker = self
            .session_revoker
            .unwrap_or_else(|| Arc::new(MockSessionRevoker::new()));
        let accounts = self
            .account_control
            .unwrap_or_else(|| Arc::new(MockAccountControl::new()));

        let revocation = Arc::new(EmergencyRevocation::new(
            vault.clone(),
            ledger.clone(),
            notifier.clone(),
        ));

        let mut rules = ResponseRuleTable::standard();
        rules.add_rule(
            argus_core::SecurityEventType::SecretAccess,
            &["revoke_secret", "notify"],
        );
        let mut responder = ThreatResponder::new(rules, blocklist.clone());
        responder.register_action(Arc::new(RateLimitAction::new(15)));
        responder.register_action(Arc::new(BlockIpAction::new(
            blocklist.clone(),
            config.ip_block_hours,
        )));
        responder.register_action(Arc::new(argus_pipeline::RevokeSessionsAction::new(revoker)));
        responder.register_action(Arc::new(DisableUserAction::new(accounts)));
        responder.register_action(Arc::new(NotifyAction::new(
            notifier.clone(),
            config.notify_recipient.clone(),
        )));
        responder.register_action(Arc::new(RevokeSecretAction {
            revocation: revocation.clone(),
            notify: vec![config.notify_recipient.clone()],
        }));
        let responder = Arc::new(responder);
        responder
            .register_callback(Arc::new(IncidentAuditCallback {
                ledger: ledger.clone(),
            }))
            .await;

        let siem_router = Arc::new(SiemRouter::new(
            self.siem_sinks,
            self.compliance.unwrap_or_default(),
        ));

        // Fan-out order: detection first, then alerting, then response,
        // then export.
        collector.subscribe(anomaly.clone()).await;
        collector.subscribe(alerts.clone()).await;
        collector.subscribe(responder.clone()).await;
        collector.subscribe(siem_router.clone()).await;

        let secrets = Arc::new(SecretsManager::new(vault.clone(), ledger.clone()));
        let rotation = Arc::new(RotationScheduler::new(secrets.clone()));
        let retention = Arc::new(RetentionManager::new(
            config.retention_policies.clone(),
            ledger.clone(),
            cold_storage,
        ));
        let reporter = Arc::new(AuditReporter::new(ledger.clone()));

        SecurityOps {
            intervals: config.intervals,
            keys: self.keys,
            ledger,
            collector,
            anomaly,
            alerts,
            responder,
            siem_router,
            secrets,
            rotation,
            revocation,
            retention,
            reporter,
            supervisor: TaskSupervisor::new(),
            started: AtomicBool::new(false),
        }
    }
}

/// The assembled security operations subsystem.
pub struct SecurityOps {
    intervals: TaskIntervals,
    keys: Arc<KeyRegistry>,
    ledger: Arc<AuditLedger>,
    collector: Arc<SecurityEventCollector>,
    anomaly: Arc<AnomalyDetector>,
    alerts: Arc<AlertManager>,
    responder: Arc<ThreatResponder>,
    siem_router: Arc<SiemRouter>,
    secrets: Arc<SecretsManager>,
    rotation: Arc<RotationScheduler>,
    revocation: Arc<EmergencyRevocation>,
    retention: Arc<RetentionManager>,
    reporter: Arc<AuditReporter>,
    supervisor: TaskSupervisor,
    started: AtomicBool,
}

impl SecurityOps {
    /// Starts the background tasks: buffer flush ticks, the alert
    /// escalation sweep, the rotation tick, and the retention sweep.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }

        let ledger = self.ledger.clone();
        self.supervisor
            .spawn("ledger-flush", self.intervals.ledger_flush, move || {
                let ledger = ledger.clone();
                async move { ledger.flush().await }
            })
            .await?;

        let collector = self.collector.clone();
        self.supervisor
            .spawn(
                "collector-flush",
                self.intervals.collector_flush,
                move || {
                    let collector = collector.clone();
                    async move { collector.flush().await }
                },
            )
            .await?;

        let alerts = self.alerts.clone();
        self.supervisor
            .spawn(
                "alert-escalation",
                self.intervals.escalation_sweep,
                move || {
                    let alerts = alerts.clone();
                    async move {
                        alerts.run_escalation_sweep().await;
                    }
                },
            )
            .await?;

        let rotation = self.rotation.clone();
        self.supervisor
            .spawn("secret-rotation", self.intervals.rotation_tick, move || {
                let rotation = rotation.clone();
                async move {
                    rotation.run_once().await;
                }
            })
            .await?;

        let retention = self.retention.clone();
        self.supervisor
            .spawn(
                "retention-sweep",
                self.intervals.retention_sweep,
                move || {
                    let retention = retention.clone();
                    async move {
                        retention.run_sweep().await;
                    }
                },
            )
            .await?;

        info!("Security operations started");
        Ok(())
    }

    /// Stops all background tasks and flushes both buffers. Idempotent.
    pub async fn stop(&self) {
        self.supervisor.shutdown().await;
        self.collector.flush().await;
        self.ledger.flush().await;
        self.started.store(false, Ordering::SeqCst);
        info!("Security operations stopped");
    }

    /// Ingress for upstream producers: reports one security event into
    /// the pipeline.
    pub async fn report_event(&self, event: SecurityEvent) {
        self.collector.report_event(event).await;
    }

    /// Ingress for upstream producers: writes one audit entry.
    pub async fn audit(&self, draft: AuditEntryDraft) -> Result<Uuid, LedgerError> {
        self.ledger.log(draft).await
    }

    /// The key registry.
    pub fn keys(&self) -> &Arc<KeyRegistry> {
        &self.keys
    }

    /// The audit ledger.
    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// The event collector.
    pub fn collector(&self) -> &Arc<SecurityEventCollector> {
        &self.collector
    }

    /// The anomaly detector.
    pub fn anomaly(&self) -> &Arc<AnomalyDetector> {
        &self.anomaly
    }

    /// The alert manager.
    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// The threat responder.
    pub fn responder(&self) -> &Arc<ThreatResponder> {
        &self.responder
    }

    /// The SIEM router.
    pub fn siem(&self) -> &Arc<SiemRouter> {
        &self.siem_router
    }

    /// The secrets manager.
    pub fn secrets(&self) -> &Arc<SecretsManager> {
        &self.secrets
    }

    /// The revocation workflow.
    pub fn revocation(&self) -> &Arc<EmergencyRevocation> {
        &self.revocation
    }

    /// The retention manager.
    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    /// The audit reporter.
    pub fn reporter(&self) -> &Arc<AuditReporter> {
        &self.reporter
    }

    /// Names of the currently running background tasks.
    pub async fn running_tasks(&self) -> Vec<String> {
        self.supervisor.running().await
    }
}
