//! Security event data models for Argus.
//!
//! This module defines the core event structures emitted by upstream
//! producers (auth layer, request validation, dispatch pipeline) and
//! consumed by every downstream processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// A security-relevant event observed somewhere in the platform.
///
/// Events are immutable once created: derived records (anomaly scores,
/// alerts, incidents) reference them by `id` and never mutate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique identifier for this event.
    pub id: Uuid,
    /// Type of the event.
    pub event_type: SecurityEventType,
    /// Severity level.
    pub severity: Severity,
    /// Timestamp when the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Source IP address, if known.
    pub source_ip: Option<IpAddr>,
    /// Acting user, if known.
    pub user_id: Option<String>,
    /// Session the event belongs to, if any.
    pub session_id: Option<String>,
    /// Resource the event touched (path, table, secret name, ...).
    pub resource: Option<String>,
    /// Action performed on the resource.
    pub action: Option<String>,
    /// Outcome of the action.
    pub outcome: EventOutcome,
    /// Additional structured details.
    pub details: HashMap<String, serde_json::Value>,
}

impl SecurityEvent {
    /// Creates a new event with the given type and severity.
    pub fn new(event_type: SecurityEventType, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity,
            timestamp: Utc::now(),
            source_ip: None,
            user_id: None,
            session_id: None,
            resource: None,
            action: None,
            outcome: EventOutcome::Success,
            details: HashMap::new(),
        }
    }

    /// Sets the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the source IP address.
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Sets the session identifier.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the touched resource.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the performed action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Adds a structured detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Returns the key identifying the actor for behavioral profiling:
    /// the user id when present, otherwise the source IP.
    pub fn actor_key(&self) -> Option<String> {
        self.user_id
            .clone()
            .or_else(|| self.source_ip.map(|ip| ip.to_string()))
    }
}

/// Types of security events recognized by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Successful authentication.
    AuthenticationSuccess,
    /// Failed authentication attempt.
    AuthenticationFailure,
    /// Authorization was denied for an authenticated user.
    AuthorizationDenied,
    /// An actor attempted or performed a privilege escalation.
    PrivilegeEscalation,
    /// Repeated authentication failures crossed the brute-force threshold.
    BruteForceDetected,
    /// A client exceeded its rate limit.
    RateLimitExceeded,
    /// Data was read from a protected resource.
    DataAccess,
    /// Data left the platform boundary.
    DataExport,
    /// A configuration value was changed.
    ConfigurationChange,
    /// A secret was read, created, rotated, or deleted.
    SecretAccess,
    /// A session behaved outside its established profile.
    SessionAnomaly,
    /// A request carried an injection payload.
    InjectionAttempt,
    /// Producer-defined event type.
    Custom(String),
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityEventType::AuthenticationSuccess => write!(f, "authentication_success"),
            SecurityEventType::AuthenticationFailure => write!(f, "authentication_failure"),
            SecurityEventType::AuthorizationDenied => write!(f, "authorization_denied"),
            SecurityEventType::PrivilegeEscalation => write!(f, "privilege_escalation"),
            SecurityEventType::BruteForceDetected => write!(f, "brute_force_detected"),
            SecurityEventType::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            SecurityEventType::DataAccess => write!(f, "data_access"),
            SecurityEventType::DataExport => write!(f, "data_export"),
            SecurityEventType::ConfigurationChange => write!(f, "configuration_change"),
            SecurityEventType::SecretAccess => write!(f, "secret_access"),
            SecurityEventType::SessionAnomaly => write!(f, "session_anomaly"),
            SecurityEventType::InjectionAttempt => write!(f, "injection_attempt"),
            SecurityEventType::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Severity levels, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required.
    Info,
    /// Needs attention during business hours.
    Warning,
    /// Requires prompt response.
    Critical,
    /// Requires immediate response, page on-call.
    Emergency,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
            Severity::Emergency => write!(f, "emergency"),
        }
    }
}

/// Outcome of the action an event describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The action completed.
    Success,
    /// The action was attempted and failed.
    Failure,
    /// The action was blocked by a control.
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_fields() {
        let event = SecurityEvent::new(SecurityEventType::DataAccess, Severity::Info)
            .with_user("alice")
            .with_resource("/dispatch/records/42")
            .with_action("read")
            .with_detail("rows", serde_json::json!(17));

        assert_eq!(event.user_id.as_deref(), Some("alice"));
        assert_eq!(event.resource.as_deref(), Some("/dispatch/records/42"));
        assert_eq!(event.details["rows"], serde_json::json!(17));
        assert_eq!(event.outcome, EventOutcome::Success);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Emergency > Severity::Critical);
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_actor_key_prefers_user() {
        let event = SecurityEvent::new(SecurityEventType::AuthenticationFailure, Severity::Warning)
            .with_user("bob")
            .with_source_ip("10.0.0.7".parse().unwrap());
        assert_eq!(event.actor_key().as_deref(), Some("bob"));

        let anonymous = SecurityEvent::new(SecurityEventType::RateLimitExceeded, Severity::Info)
            .with_source_ip("10.0.0.7".parse().unwrap());
        assert_eq!(anonymous.actor_key().as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_event_type_serde_snake_case() {
        let json = serde_json::to_string(&SecurityEventType::PrivilegeEscalation).unwrap();
        assert_eq!(json, "\"privilege_escalation\"");
    }
}
