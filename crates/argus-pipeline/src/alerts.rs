//! Alert management: deduplication, channel selection, escalation.

use crate::collector::{EventListener, ListenerError};
use argus_core::{SecurityEvent, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors from alert operations.
#[derive(Debug, Error)]
pub enum AlertError {
    /// No alert with this id exists.
    #[error("Alert not found: {0}")]
    NotFound(Uuid),

    /// The requested status change is not allowed.
    #[error("Invalid alert transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current status.
        from: AlertStatus,
        /// Requested status.
        to: AlertStatus,
    },
}

/// Delivery channels for an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    /// Page the on-call rotation.
    Page,
    /// Team chat.
    Chat,
    /// SMS to responders.
    Sms,
    /// Email.
    Email,
    /// Operational log only.
    Log,
}

/// Alert lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Raised, nobody has looked yet.
    New,
    /// A responder has seen it.
    Acknowledged,
    /// Being actively investigated.
    Investigating,
    /// Confirmed and dealt with.
    Resolved,
    /// Determined to be noise.
    FalsePositive,
}

impl AlertStatus {
    /// True once the alert needs no further escalation.
    pub fn is_closed(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }

    fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::New, AlertStatus::Acknowledged)
                | (AlertStatus::Acknowledged, AlertStatus::Investigating)
                | (AlertStatus::Investigating, AlertStatus::Resolved)
                | (AlertStatus::Investigating, AlertStatus::FalsePositive)
        )
    }
}

/// A raised alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: Uuid,
    /// Short title.
    pub title: String,
    /// Severity inherited from the triggering event.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// When the alert was raised.
    pub triggered_at: DateTime<Utc>,
    /// When the alert was last escalated.
    pub last_escalated_at: Option<DateTime<Utc>>,
    /// How many times it has been escalated.
    pub escalation_count: u32,
    /// Channels the alert goes to.
    pub channels: Vec<AlertChannel>,
    /// Dedup fingerprint.
    pub fingerprint: String,
    /// Event that triggered the alert, when one did.
    pub source_event_id: Option<Uuid>,
    /// Affected user.
    pub user_id: Option<String>,
    /// Originating IP.
    pub source_ip: Option<IpAddr>,
}

/// Alert manager configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Sliding window within which identical fingerprints are suppressed.
    pub dedup_window: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::minutes(5),
        }
    }
}

/// Escalation SLA per severity: an open alert unescalated for longer
/// than this is escalated by the periodic sweep.
pub fn escalation_sla(severity: Severity) -> Duration {
    match severity {
        Severity::Emergency => Duration::minutes(5),
        Severity::Critical => Duration::minutes(30),
        Severity::Warning => Duration::hours(4),
        Severity::Info => Duration::hours(24),
    }
}

/// Channel set per severity.
fn channels_for(severity: Severity) -> Vec<AlertChannel> {
    match severity {
        Severity::Emergency => vec![AlertChannel::Page, AlertChannel::Chat, AlertChannel::Sms],
        Severity::Critical => vec![AlertChannel::Chat, AlertChannel::Email],
        Severity::Warning | Severity::Info => vec![AlertChannel::Log],
    }
}

/// Computes the dedup fingerprint over the identity of an issue.
pub fn fingerprint(
    severity: Severity,
    title: &str,
    user_id: Option<&str>,
    source_ip: Option<IpAddr>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(severity.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(user_id.unwrap_or("").as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_ip.map(|ip| ip.to_string()).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

struct AlertState {
    alerts: HashMap<Uuid, Alert>,
    /// Fingerprint to last-seen time, for the sliding dedup window.
    fingerprints: HashMap<String, DateTime<Utc>>,
    suppressed: u64,
}

/// Creates, deduplicates, and escalates alerts.
pub struct AlertManager {
    config: AlertConfig,
    state: RwLock<AlertState>,
}

impl AlertManager {
    /// Creates an alert manager.
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AlertState {
                alerts: HashMap::new(),
                fingerprints: HashMap::new(),
                suppressed: 0,
            }),
        }
    }

    /// Auto-creates an alert for qualifying events.
    ///
    /// Only critical and emergency events raise alerts; duplicates within
    /// the dedup window are suppressed. Returns the new alert id, or
    /// `None` when nothing was raised.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn handle_event(&self, event: &SecurityEvent) -> Option<Uuid> {
        if event.severity < Severity::Critical {
            return None;
        }
        let title = format!("{}", event.event_type);
        self.raise(
            &title,
            event.severity,
            event.user_id.as_deref(),
            event.source_ip,
            Some(event.id),
        )
        .await
    }

    /// Raises an alert unless its fingerprint was seen within the window.
    pub async fn raise(
        &self,
        title: &str,
        severity: Severity,
        user_id: Option<&str>,
        source_ip: Option<IpAddr>,
        source_event_id: Option<Uuid>,
    ) -> Option<Uuid> {
        let print = fingerprint(severity, title, user_id, source_ip);
        let now = Utc::now();

        let mut state = self.state.write().await;
        // Evict stale fingerprints on every check so the window slides.
        let window = self.config.dedup_window;
        state.fingerprints.retain(|_, seen| now - *seen < window);

        if state.fingerprints.contains_key(&print) {
            state.suppressed += 1;
            debug!(fingerprint = %print, "Duplicate alert suppressed");
            return None;
        }
        state.fingerprints.insert(print.clone(), now);

        let alert = Alert {
            id: Uuid::new_v4(),
            title: title.to_string(),
            severity,
            status: AlertStatus::New,
            triggered_at: now,
            last_escalated_at: None,
            escalation_count: 0,
            channels: channels_for(severity),
            fingerprint: print,
            source_event_id,
            user_id: user_id.map(str::to_string),
            source_ip,
        };
        let id = alert.id;
        info!(
            alert_id = %id,
            severity = %severity,
            channels = ?alert.channels,
            "Alert raised: {}",
            title
        );
        state.alerts.insert(id, alert);
        Some(id)
    }

    /// Bumps an alert's escalation counter and timestamp.
    pub async fn escalate(&self, id: Uuid) -> Result<u32, AlertError> {
        let mut state = self.state.write().await;
        let alert = state.alerts.get_mut(&id).ok_or(AlertError::NotFound(id))?;
        alert.escalation_count += 1;
        alert.last_escalated_at = Some(Utc::now());
        warn!(
            alert_id = %id,
            count = alert.escalation_count,
            "Alert escalated: {}",
            alert.title
        );
        Ok(alert.escalation_count)
    }

    /// Escalates every open alert whose time since last escalation (or
    /// since triggering) exceeds its severity SLA. Returns the ids
    /// escalated this sweep.
    #[instrument(skip(self))]
    pub async fn run_escalation_sweep(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut escalated = Vec::new();
        let mut state = self.state.write().await;
        for alert in state.alerts.values_mut() {
            if alert.status.is_closed() {
                continue;
            }
            let reference = alert.last_escalated_at.unwrap_or(alert.triggered_at);
            if now - reference > escalation_sla(alert.severity) {
                alert.escalation_count += 1;
                alert.last_escalated_at = Some(now);
                escalated.push(alert.id);
                warn!(alert_id = %alert.id, "SLA breach, alert auto-escalated");
            }
        }
        escalated
    }

    /// Marks an alert acknowledged.
    pub async fn acknowledge(&self, id: Uuid) -> Result<(), AlertError> {
        self.set_status(id, AlertStatus::Acknowledged).await
    }

    /// Moves an alert along its lifecycle, enforcing legal transitions.
    pub async fn set_status(&self, id: Uuid, status: AlertStatus) -> Result<(), AlertError> {
        let mut state = self.state.write().await;
        let alert = state.alerts.get_mut(&id).ok_or(AlertError::NotFound(id))?;
        if !alert.status.can_transition_to(status) {
            return Err(AlertError::InvalidTransition {
                from: alert.status,
                to: status,
            });
        }
        alert.status = status;
        Ok(())
    }

    /// Returns one alert.
    pub async fn alert(&self, id: Uuid) -> Option<Alert> {
        self.state.read().await.alerts.get(&id).cloned()
    }

    /// Returns all alerts, newest first.
    pub async fn alerts(&self) -> Vec<Alert> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state.alerts.values().cloned().collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts
    }

    /// Alerts not yet resolved or dismissed.
    pub async fn open_alerts(&self) -> Vec<Alert> {
        self.alerts()
            .await
            .into_iter()
            .filter(|a| !a.status.is_closed())
            .collect()
    }

    /// Number of suppressed duplicates since startup.
    pub async fn suppressed_count(&self) -> u64 {
        self.state.read().await.suppressed
    }

    /// Testing hook: rewinds dedup and escalation clocks by `delta`.
    #[cfg(test)]
    async fn rewind_clocks(&self, delta: Duration) {
        let mut state = self.state.write().await;
        for seen in state.fingerprints.values_mut() {
            *seen = *seen - delta;
        }
        for alert in state.alerts.values_mut() {
            alert.triggered_at = alert.triggered_at - delta;
            if let Some(at) = alert.last_escalated_at.as_mut() {
                *at = *at - delta;
            }
        }
    }
}

#[async_trait]
impl EventListener for AlertManager {
    fn name(&self) -> &str {
        "alert-manager"
    }

    async fn on_event(&self, event: &SecurityEvent) -> Result<(), ListenerError> {
        self.handle_event(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::SecurityEventType;

    fn manager() -> AlertManager {
        AlertManager::new(AlertConfig::default())
    }

    fn critical_event(user: &str) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::BruteForceDetected, Severity::Critical)
            .with_user(user)
            .with_source_ip("203.0.113.5".parse().unwrap())
    }

    #[tokio::test]
    async fn test_duplicate_within_window_suppressed() {
        let manager = manager();
        let first = manager.handle_event(&critical_event("alice")).await;
        assert!(first.is_some());

        let second = manager.handle_event(&critical_event("alice")).await;
        assert!(second.is_none());
        assert_eq!(manager.suppressed_count().await, 1);
        assert_eq!(manager.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_alert_after_window_expires() {
        let manager = manager();
        manager.handle_event(&critical_event("alice")).await.unwrap();
        manager.rewind_clocks(Duration::minutes(6)).await;

        let second = manager.handle_event(&critical_event("alice")).await;
        assert!(second.is_some());
        assert_eq!(manager.alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_different_actors_are_distinct_fingerprints() {
        let manager = manager();
        assert!(manager.handle_event(&critical_event("alice")).await.is_some());
        assert!(manager.handle_event(&critical_event("bob")).await.is_some());
        assert_eq!(manager.alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_low_severity_events_do_not_alert() {
        let manager = manager();
        let event =
            SecurityEvent::new(SecurityEventType::DataAccess, Severity::Warning).with_user("x");
        assert!(manager.handle_event(&event).await.is_none());
        assert!(manager.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_channels_match_severity() {
        let manager = manager();
        let emergency = SecurityEvent::new(
            SecurityEventType::PrivilegeEscalation,
            Severity::Emergency,
        )
        .with_user("root");
        let id = manager.handle_event(&emergency).await.unwrap();
        let alert = manager.alert(id).await.unwrap();
        assert_eq!(
            alert.channels,
            vec![AlertChannel::Page, AlertChannel::Chat, AlertChannel::Sms]
        );

        let id = manager.handle_event(&critical_event("c")).await.unwrap();
        let alert = manager.alert(id).await.unwrap();
        assert_eq!(alert.channels, vec![AlertChannel::Chat, AlertChannel::Email]);
    }

    #[tokio::test]
    async fn test_escalation_sweep_honors_sla() {
        let manager = manager();
        let id = manager.handle_event(&critical_event("alice")).await.unwrap();

        // Fresh alert: within the 30 minute critical SLA.
        assert!(manager.run_escalation_sweep().await.is_empty());

        manager.rewind_clocks(Duration::minutes(31)).await;
        let escalated = manager.run_escalation_sweep().await;
        assert_eq!(escalated, vec![id]);

        let alert = manager.alert(id).await.unwrap();
        assert_eq!(alert.escalation_count, 1);
        assert!(alert.last_escalated_at.is_some());

        // The sweep just escalated it; nothing further until the SLA
        // elapses again.
        assert!(manager.run_escalation_sweep().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_alerts_not_escalated() {
        let manager = manager();
        let id = manager.handle_event(&critical_event("alice")).await.unwrap();
        manager.acknowledge(id).await.unwrap();
        manager.set_status(id, AlertStatus::Investigating).await.unwrap();
        manager.set_status(id, AlertStatus::Resolved).await.unwrap();

        manager.rewind_clocks(Duration::hours(2)).await;
        assert!(manager.run_escalation_sweep().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_transitions_enforced() {
        let manager = manager();
        let id = manager.handle_event(&critical_event("alice")).await.unwrap();

        let err = manager
            .set_status(id, AlertStatus::Resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::InvalidTransition { .. }));

        manager.acknowledge(id).await.unwrap();
        manager.set_status(id, AlertStatus::Investigating).await.unwrap();
        manager
            .set_status(id, AlertStatus::FalsePositive)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_manual_escalate() {
        let manager = manager();
        let id = manager.handle_event(&critical_event("alice")).await.unwrap();
        assert_eq!(manager.escalate(id).await.unwrap(), 1);
        assert_eq!(manager.escalate(id).await.unwrap(), 2);
        assert!(matches!(
            manager.escalate(Uuid::new_v4()).await,
            Err(AlertError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fingerprint_inputs() {
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let a = fingerprint(Severity::Critical, "t", Some("u"), Some(ip));
        assert_eq!(a, fingerprint(Severity::Critical, "t", Some("u"), Some(ip)));
        assert_ne!(a, fingerprint(Severity::Emergency, "t", Some("u"), Some(ip)));
        assert_ne!(a, fingerprint(Severity::Critical, "t2", Some("u"), Some(ip)));
        assert_ne!(a, fingerprint(Severity::Critical, "t", Some("v"), Some(ip)));
        assert_ne!(a, fingerprint(Severity::Critical, "t", Some("u"), None));
    }
}
