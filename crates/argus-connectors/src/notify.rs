//! Notification sinks.
//!
//! Revocation workflows and response actions notify people through this
//! trait. Delivery failure is logged by callers, never escalated: a
//! notification that cannot be sent must not fail the operation that
//! triggered it.

use crate::http::{HttpClient, HttpConfig};
use crate::traits::ConnectorResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::instrument;

/// Errors from notification delivery.
#[derive(Debug, Error, Clone)]
pub enum NotifyError {
    /// The sink could not deliver the message.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// A destination for human-readable notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name, used in logs.
    fn name(&self) -> &str;

    /// Sends one message to one recipient.
    async fn notify(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), NotifyError>;
}

/// Notification sink that POSTs messages to a webhook.
pub struct WebhookNotifier {
    client: HttpClient,
}

impl WebhookNotifier {
    /// Creates a notifier posting to the configured base URL.
    pub fn new(config: HttpConfig) -> ConnectorResult<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        self.client.name()
    }

    #[instrument(skip(self, body), fields(sink = %self.name()))]
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "recipient": recipient,
            "subject": subject,
            "body": body,
        });
        self.client
            .post_json("/notify", &payload, &[])
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

/// A recorded notification, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Who the message went to.
    pub recipient: String,
    /// Message subject.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Records notifications in memory; can be told to fail deliveries.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: AtomicBool,
}

impl MockNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns everything sent so far.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    fn name(&self) -> &str {
        "mock-notifier"
    }

    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("injected failure".to_string()));
        }
        self.sent
            .lock()
            .expect("notifier lock poisoned")
            .push(SentNotification {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_messages() {
        let notifier = MockNotifier::new();
        notifier
            .notify("oncall@dispatch.example", "revoked", "secret api-key revoked")
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "oncall@dispatch.example");
        assert_eq!(sent[0].subject, "revoked");
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let notifier = MockNotifier::new();
        notifier.set_fail(true);
        assert!(notifier.notify("a", "b", "c").await.is_err());
        assert!(notifier.sent().is_empty());
    }
}
