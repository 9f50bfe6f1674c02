//! # argus-connectors
//!
//! Adapters between Argus and the outside world: SIEM sinks, notification
//! sinks, and the shared HTTP client they are built on. Each adapter has a
//! mock sibling with an identical contract so every consumer is testable
//! without network access.

pub mod http;
pub mod notify;
pub mod secure_string;
pub mod siem;
pub mod traits;

pub use http::{HttpClient, HttpConfig};
pub use notify::{MockNotifier, NotificationSink, NotifyError, WebhookNotifier};
pub use secure_string::SecureString;
pub use siem::{
    HttpPushSink, HttpPushSinkConfig, MockSiemSink, PayloadKind, SiemPayload, SiemSink,
    SignedSink, SignedSinkConfig,
};
pub use traits::{AuthConfig, ConnectorError, ConnectorResult, SinkHealth};
