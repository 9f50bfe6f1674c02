//! Automated threat response.
//!
//! A static rule table maps event types to an ordered list of response
//! actions. Responding to an event creates a [`SecurityIncident`] that
//! records every action outcome, failures included, and is closed only
//! explicitly.

use crate::collector::{EventListener, ListenerError};
use argus_connectors::NotificationSink;
use argus_core::{SecurityEvent, SecurityEventType, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Errors from incident bookkeeping.
#[derive(Debug, Error)]
pub enum IncidentError {
    /// No incident with this id exists.
    #[error("Incident not found: {0}")]
    NotFound(Uuid),

    /// The requested status change is not allowed.
    #[error("Invalid incident transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current status.
        from: IncidentStatus,
        /// Requested status.
        to: IncidentStatus,
    },
}

/// Recorded outcome of one executed response action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Action name.
    pub action: String,
    /// Whether it succeeded.
    pub success: bool,
    /// What happened.
    pub message: String,
    /// When it ran.
    pub executed_at: DateTime<Utc>,
}

/// An automated response action.
#[async_trait]
pub trait ResponseAction: Send + Sync {
    /// Registry name of the action.
    fn name(&self) -> &str;

    /// Executes the action for an event, reporting the outcome either way.
    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome;
}

/// A blocked IP address. Temporary blocks expire on read: once
/// `blocked_until` passes, [`active`](Self::active) is false with no
/// explicit unblock call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIp {
    /// The blocked address.
    pub ip: IpAddr,
    /// When the block was placed.
    pub blocked_at: DateTime<Utc>,
    /// When a temporary block lapses.
    pub blocked_until: Option<DateTime<Utc>>,
    /// True for permanent blocks.
    pub permanent: bool,
    /// Why the block was placed.
    pub reason: String,
}

impl BlockedIp {
    /// True while the block is in force.
    pub fn active(&self) -> bool {
        if self.permanent {
            return true;
        }
        match self.blocked_until {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }
}

/// Shared registry of blocked IPs.
#[derive(Default)]
pub struct IpBlocklist {
    blocks: RwLock<HashMap<IpAddr, BlockedIp>>,
}

impl IpBlocklist {
    /// Creates an empty blocklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a block. `duration` of `None` makes it permanent.
    pub async fn block(&self, ip: IpAddr, duration: Option<Duration>, reason: &str) {
        let now = Utc::now();
        let block = BlockedIp {
            ip,
            blocked_at: now,
            blocked_until: duration.map(|d| now + d),
            permanent: duration.is_none(),
            reason: reason.to_string(),
        };
        info!(ip = %ip, permanent = block.permanent, "IP blocked: {}", reason);
        self.blocks.write().await.insert(ip, block);
    }

    /// True if the IP is currently blocked; expiry is computed here.
    pub async fn is_blocked(&self, ip: IpAddr) -> bool {
        self.blocks
            .read()
            .await
            .get(&ip)
            .map(BlockedIp::active)
            .unwrap_or(false)
    }

    /// Returns the blocks whose `active()` still holds.
    pub async fn active_blocks(&self) -> Vec<BlockedIp> {
        self.blocks
            .read()
            .await
            .values()
            .filter(|b| b.active())
            .cloned()
            .collect()
    }

    /// Testing hook: rewrites a block's expiry.
    #[cfg(test)]
    pub(crate) async fn set_blocked_until(&self, ip: IpAddr, until: DateTime<Utc>) {
        if let Some(block) = self.blocks.write().await.get_mut(&ip) {
            block.blocked_until = Some(until);
        }
    }
}

/// Revokes the live sessions of a user. Implemented by the session layer;
/// the bundled mock records calls for tests and development.
#[async_trait]
pub trait SessionRevoker: Send + Sync {
    /// Revokes all sessions for a user, returning how many were ended.
    async fn revoke_sessions(&self, user_id: &str) -> Result<u32, String>;
}

/// Disables user accounts. Implemented by the identity layer.
#[async_trait]
pub trait AccountControl: Send + Sync {
    /// Disables a user account.
    async fn disable_user(&self, user_id: &str) -> Result<(), String>;
}

/// In-memory session revoker.
#[derive(Default)]
pub struct MockSessionRevoker {
    revoked: RwLock<Vec<String>>,
}

impl MockSessionRevoker {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Users whose sessions were revoked.
    pub async fn revoked(&self) -> Vec<String> {
        self.revoked.read().await.clone()
    }
}

#[async_trait]
impl SessionRevoker for MockSessionRevoker {
    async fn revoke_sessions(&self, user_id: &str) -> Result<u32, String> {
        self.revoked.write().await.push(user_id.to_string());
        Ok(1)
    }
}

/// In-memory account control.
#[derive(Default)]
pub struct MockAccountControl {
    disabled: RwLock<Vec<String>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MockAccountControl {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Users that were disabled.
    pub async fn disabled(&self) -> Vec<String> {
        self.disabled.read().await.clone()
    }
}

#[async_trait]
impl AccountControl for MockAccountControl {
    async fn disable_user(&self, user_id: &str) -> Result<(), String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("injected identity-provider outage".to_string());
        }
        self.disabled.write().await.push(user_id.to_string());
        Ok(())
    }
}

/// Applies a temporary rate limit to the offending actor.
pub struct RateLimitAction {
    limited: RwLock<HashMap<String, DateTime<Utc>>>,
    duration: Duration,
}

impl RateLimitAction {
    /// Creates a rate limiter holding actors for `duration_minutes`.
    pub fn new(duration_minutes: i64) -> Self {
        Self {
            limited: RwLock::new(HashMap::new()),
            duration: Duration::minutes(duration_minutes),
        }
    }

    /// True if the actor is currently limited.
    pub async fn is_limited(&self, actor: &str) -> bool {
        self.limited
            .read()
            .await
            .get(actor)
            .map(|until| Utc::now() < *until)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ResponseAction for RateLimitAction {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome {
        let executed_at = Utc::now();
        match event.actor_key() {
            Some(actor) => {
                self.limited
                    .write()
                    .await
                    .insert(actor.clone(), executed_at + self.duration);
                ActionOutcome {
                    action: self.name().to_string(),
                    success: true,
                    message: format!("rate limit applied to {}", actor),
                    executed_at,
                }
            }
            None => ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: "event carries no actor to rate limit".to_string(),
                executed_at,
            },
        }
    }
}

/// Blocks the event's source IP.
pub struct BlockIpAction {
    blocklist: Arc<IpBlocklist>,
    /// Block duration; `None` blocks permanently.
    duration_hours: Option<i64>,
}

impl BlockIpAction {
    /// Creates a temporary block action.
    pub fn new(blocklist: Arc<IpBlocklist>, duration_hours: i64) -> Self {
        Self {
            blocklist,
            duration_hours: Some(duration_hours),
        }
    }

    /// Creates a permanent block action.
    pub fn permanent(blocklist: Arc<IpBlocklist>) -> Self {
        Self {
            blocklist,
            duration_hours: None,
        }
    }
}

#[async_trait]
impl ResponseAction for BlockIpAction {
    fn name(&self) -> &str {
        "block_ip"
    }

    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome {
        let executed_at = Utc::now();
        match event.source_ip {
            Some(ip) => {
                let duration = self.duration_hours.map(Duration::hours);
                self.blocklist
                    .block(ip, duration, &format!("response to {}", event.event_type))
                    .await;
                ActionOutcome {
                    action: self.name().to_string(),
                    success: true,
                    message: match self.duration_hours {
                        Some(h) => format!("{} blocked for {}h", ip, h),
                        None => format!("{} blocked permanently", ip),
                    },
                    executed_at,
                }
            }
            None => ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: "event carries no source IP".to_string(),
                executed_at,
            },
        }
    }
}

/// Revokes the affected user's sessions.
pub struct RevokeSessionsAction {
    revoker: Arc<dyn SessionRevoker>,
}

impl RevokeSessionsAction {
    /// Creates the action over a session layer.
    pub fn new(revoker: Arc<dyn SessionRevoker>) -> Self {
        Self { revoker }
    }
}

#[async_trait]
impl ResponseAction for RevokeSessionsAction {
    fn name(&self) -> &str {
        "revoke_sessions"
    }

    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome {
        let executed_at = Utc::now();
        let Some(user_id) = event.user_id.as_deref() else {
            return ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: "event carries no user".to_string(),
                executed_at,
            };
        };
        match self.revoker.revoke_sessions(user_id).await {
            Ok(count) => ActionOutcome {
                action: self.name().to_string(),
                success: true,
                message: format!("revoked {} session(s) for {}", count, user_id),
                executed_at,
            },
            Err(e) => ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: e,
                executed_at,
            },
        }
    }
}

/// Disables the affected user's account.
pub struct DisableUserAction {
    accounts: Arc<dyn AccountControl>,
}

impl DisableUserAction {
    /// Creates the action over an identity layer.
    pub fn new(accounts: Arc<dyn AccountControl>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl ResponseAction for DisableUserAction {
    fn name(&self) -> &str {
        "disable_user"
    }

    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome {
        let executed_at = Utc::now();
        let Some(user_id) = event.user_id.as_deref() else {
            return ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: "event carries no user".to_string(),
                executed_at,
            };
        };
        match self.accounts.disable_user(user_id).await {
            Ok(()) => ActionOutcome {
                action: self.name().to_string(),
                success: true,
                message: format!("account {} disabled", user_id),
                executed_at,
            },
            Err(e) => ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: e,
                executed_at,
            },
        }
    }
}

/// Notifies the security channel about the event.
pub struct NotifyAction {
    sink: Arc<dyn NotificationSink>,
    recipient: String,
}

impl NotifyAction {
    /// Creates the action over a notification sink.
    pub fn new(sink: Arc<dyn NotificationSink>, recipient: impl Into<String>) -> Self {
        Self {
            sink,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl ResponseAction for NotifyAction {
    fn name(&self) -> &str {
        "notify"
    }

    async fn execute(&self, event: &SecurityEvent) -> ActionOutcome {
        let executed_at = Utc::now();
        let subject = format!("Automated response: {}", event.event_type);
        let body = format!(
            "Event {} ({}, severity {}) triggered an automated response.",
            event.id, event.event_type, event.severity
        );
        match self.sink.notify(&self.recipient, &subject, &body).await {
            Ok(()) => ActionOutcome {
                action: self.name().to_string(),
                success: true,
                message: format!("notified {}", self.recipient),
                executed_at,
            },
            Err(e) => ActionOutcome {
                action: self.name().to_string(),
                success: false,
                message: e.to_string(),
                executed_at,
            },
        }
    }
}

/// Static mapping of event type to ordered action names.
#[derive(Debug, Clone)]
pub struct ResponseRuleTable {
    rules: HashMap<SecurityEventType, Vec<String>>,
}

impl ResponseRuleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// The standard dispatch-platform rule set.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.add_rule(
            SecurityEventType::BruteForceDetected,
            &["rate_limit", "block_ip"],
        );
        table.add_rule(
            SecurityEventType::PrivilegeEscalation,
            &["revoke_sessions", "disable_user", "notify"],
        );
        table.add_rule(SecurityEventType::InjectionAttempt, &["block_ip", "notify"]);
        table.add_rule(
            SecurityEventType::SessionAnomaly,
            &["revoke_sessions", "notify"],
        );
        table
    }

    /// Adds or replaces the rule for one event type.
    pub fn add_rule(&mut self, event_type: SecurityEventType, actions: &[&str]) {
        self.rules
            .insert(event_type, actions.iter().map(|s| s.to_string()).collect());
    }

    /// Returns the ordered action names for an event type.
    pub fn actions_for(&self, event_type: &SecurityEventType) -> Option<&[String]> {
        self.rules.get(event_type).map(Vec::as_slice)
    }
}

impl Default for ResponseRuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Incident lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Response just started.
    Open,
    /// A responder is investigating.
    Investigating,
    /// The threat is contained.
    Contained,
    /// Remediation finished.
    Remediated,
    /// Closed; terminal.
    Closed,
}

impl IncidentStatus {
    fn can_transition_to(&self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (IncidentStatus::Open, IncidentStatus::Investigating)
                | (IncidentStatus::Investigating, IncidentStatus::Contained)
                | (IncidentStatus::Contained, IncidentStatus::Remediated)
                | (IncidentStatus::Remediated, IncidentStatus::Closed)
        )
    }
}

/// A security incident assembled by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    /// Incident id.
    pub id: Uuid,
    /// Severity inherited from the triggering event.
    pub severity: Severity,
    /// Lifecycle status; closed only explicitly.
    pub status: IncidentStatus,
    /// Events that fed this incident.
    pub event_ids: Vec<Uuid>,
    /// Alerts associated with this incident.
    pub alert_ids: Vec<Uuid>,
    /// Every executed action, successes and failures alike.
    pub response_actions: Vec<ActionOutcome>,
    /// When the incident was opened.
    pub created_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

/// Callback invoked after the responder finishes an incident's actions.
#[async_trait]
pub trait IncidentCallback: Send + Sync {
    /// Receives the finished incident.
    async fn on_incident(&self, incident: &SecurityIncident);
}

/// Executes the rule table against incoming events.
pub struct ThreatResponder {
    rules: ResponseRuleTable,
    actions: HashMap<String, Arc<dyn ResponseAction>>,
    blocklist: Arc<IpBlocklist>,
    incidents: RwLock<HashMap<Uuid, SecurityIncident>>,
    callbacks: RwLock<Vec<Arc<dyn IncidentCallback>>>,
}

impl ThreatResponder {
    /// Creates a responder with no registered actions.
    pub fn new(rules: ResponseRuleTable, blocklist: Arc<IpBlocklist>) -> Self {
        Self {
            rules,
            actions: HashMap::new(),
            blocklist,
            incidents: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Registers an action under its own name.
    pub fn register_action(&mut self, action: Arc<dyn ResponseAction>) {
        self.actions.insert(action.name().to_string(), action);
    }

    /// Registers an incident callback.
    pub async fn register_callback(&self, callback: Arc<dyn IncidentCallback>) {
        self.callbacks.write().await.push(callback);
    }

    /// Responds to an event per the rule table.
    ///
    /// Returns the incident id when the event type has a rule, `None`
    /// otherwise. Every listed action is executed in order and recorded
    /// regardless of outcome; an unregistered action name is logged and
    /// skipped, never fatal.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn respond(&self, event: &SecurityEvent) -> Option<Uuid> {
        let action_names = self.rules.actions_for(&event.event_type)?.to_vec();

        let now = Utc::now();
        let mut incident = SecurityIncident {
            id: Uuid::new_v4(),
            severity: event.severity,
            status: IncidentStatus::Open,
            event_ids: vec![event.id],
            alert_ids: Vec::new(),
            response_actions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        info!(
            incident_id = %incident.id,
            event_type = %event.event_type,
            "Automated response started"
        );

        for name in &action_names {
            match self.actions.get(name) {
                Some(action) => {
                    let outcome = action.execute(event).await;
                    if !outcome.success {
                        warn!(
                            incident_id = %incident.id,
                            action = %name,
                            "Response action failed: {}",
                            outcome.message
                        );
                    }
                    incident.response_actions.push(outcome);
                }
                None => {
                    warn!(
                        incident_id = %incident.id,
                        action = %name,
                        "Response action not registered, skipped"
                    );
                }
            }
        }
        incident.updated_at = Utc::now();

        let id = incident.id;
        self.incidents.write().await.insert(id, incident.clone());

        let callbacks = self.callbacks.read().await.clone();
        for callback in callbacks {
            callback.on_incident(&incident).await;
        }
        Some(id)
    }

    /// Attaches an alert to an incident.
    pub async fn link_alert(&self, incident_id: Uuid, alert_id: Uuid) -> Result<(), IncidentError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&incident_id)
            .ok_or(IncidentError::NotFound(incident_id))?;
        incident.alert_ids.push(alert_id);
        incident.updated_at = Utc::now();
        Ok(())
    }

    /// Moves an incident along its lifecycle, enforcing legal transitions.
    pub async fn set_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<(), IncidentError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents.get_mut(&id).ok_or(IncidentError::NotFound(id))?;
        if !incident.status.can_transition_to(status) {
            return Err(IncidentError::InvalidTransition {
                from: incident.status,
                to: status,
            });
        }
        incident.status = status;
        incident.updated_at = Utc::now();
        Ok(())
    }

    /// Returns one incident.
    pub async fn incident(&self, id: Uuid) -> Option<SecurityIncident> {
        self.incidents.read().await.get(&id).cloned()
    }

    /// Returns all incidents, newest first.
    pub async fn incidents(&self) -> Vec<SecurityIncident> {
        let mut incidents: Vec<SecurityIncident> =
            self.incidents.read().await.values().cloned().collect();
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        incidents
    }

    /// True if the IP is currently blocked.
    pub async fn is_ip_blocked(&self, ip: IpAddr) -> bool {
        self.blocklist.is_blocked(ip).await
    }

    /// Currently active IP blocks.
    pub async fn blocked_ips(&self) -> Vec<BlockedIp> {
        self.blocklist.active_blocks().await
    }
}

#[async_trait]
impl EventListener for ThreatResponder {
    fn name(&self) -> &str {
        "threat-responder"
    }

    async fn on_event(&self, event: &SecurityEvent) -> Result<(), ListenerError> {
        self.respond(event).await;
        Ok(())
    }
}
