//! # argus-pipeline
//!
//! The streaming security-event pipeline: producers report events into the
//! [`SecurityEventCollector`], which fans each event out synchronously to
//! the registered listeners (behavioral anomaly detection, alerting,
//! automated threat response, SIEM export) before buffering it for the
//! drain. One listener's failure never reaches its siblings.

pub mod alerts;
pub mod anomaly;
pub mod collector;
pub mod responder;
pub mod siem;

pub use alerts::{Alert, AlertChannel, AlertConfig, AlertError, AlertManager, AlertStatus};
pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalyScore, BehavioralBaseline};
pub use collector::{
    CollectorConfig, CollectorStats, EventDrain, EventListener, ListenerError,
    SecurityEventCollector,
};
pub use responder::{
    AccountControl, ActionOutcome, BlockIpAction, BlockedIp, DisableUserAction, IncidentCallback,
    IncidentError, IncidentStatus, IpBlocklist, MockAccountControl, MockSessionRevoker,
    NotifyAction, RateLimitAction, ResponseAction, ResponseRuleTable, RevokeSessionsAction,
    SecurityIncident, SessionRevoker, ThreatResponder,
};
pub use siem::{ComplianceMapper, ControlReference, SiemRouter};
