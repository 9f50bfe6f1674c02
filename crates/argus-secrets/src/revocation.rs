//! Emergency revocation workflow.
//!
//! Revocation runs in one of two modes: immediate (compromise response)
//! or approval-gated (pending until a second person approves). Execution
//! deletes the secret from the vault, audits the outcome, updates the
//! record, and notifies the configured recipients. A vault-deletion
//! failure marks the record failed with a failure audit entry and no
//! automatic retry.

use crate::vault::{VaultClient, VaultError};
use argus_connectors::NotificationSink;
use argus_core::Severity;
use argus_ledger::{AuditAction, AuditLedger, AuditOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Errors from the revocation workflow.
#[derive(Debug, Error)]
pub enum RevocationError {
    /// No record with this id exists.
    #[error("Revocation record not found: {0}")]
    NotFound(Uuid),

    /// The record is not awaiting approval.
    #[error("Revocation {id} is {status:?}, not pending approval")]
    NotPending {
        /// Record id.
        id: Uuid,
        /// Its actual status.
        status: RevocationStatus,
    },
}

/// Why a secret is being revoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// The secret is known or suspected compromised.
    Compromised,
    /// Use of the secret violated policy.
    PolicyViolation,
    /// The owning person or service is being offboarded.
    Offboarding,
    /// Precautionary rotation-by-revocation.
    Precautionary,
    /// Anything else.
    Other(String),
}

/// Lifecycle of a revocation request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationStatus {
    /// Awaiting approval.
    Pending,
    /// Being executed.
    InProgress,
    /// The secret was deleted and all bookkeeping finished.
    Completed,
    /// Execution failed or the request was rejected; no automatic retry.
    Failed,
}

/// One revocation request and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Record id; also the correlation id of the matching audit entries.
    pub id: Uuid,
    /// Secret being revoked.
    pub secret_name: String,
    /// Why.
    pub reason: RevocationReason,
    /// Who asked for the revocation.
    pub requested_by: String,
    /// How urgent this is.
    pub severity: Severity,
    /// Current status.
    pub status: RevocationStatus,
    /// Whether a second person must approve before execution.
    pub approval_required: bool,
    /// Who approved or rejected, once decided.
    pub approved_by: Option<String>,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
    /// When execution finished (either way).
    pub completed_at: Option<DateTime<Utc>>,
    /// Why execution failed, when it did.
    pub failure_reason: Option<String>,
    /// Recipients notified after execution.
    pub notify: Vec<String>,
}

/// The revocation workflow engine.
pub struct EmergencyRevocation {
    vault: Arc<dyn VaultClient>,
    ledger: Arc<AuditLedger>,
    notifier: Arc<dyn NotificationSink>,
    records: RwLock<HashMap<Uuid, RevocationRecord>>,
}

impl EmergencyRevocation {
    /// Creates the workflow over the given vault, ledger, and notifier.
    pub fn new(
        vault: Arc<dyn VaultClient>,
        ledger: Arc<AuditLedger>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            vault,
            ledger,
            notifier,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Files a revocation request.
    ///
    /// Without `approval_required` the revocation executes immediately;
    /// with it, the record stays pending until
    /// [`approve_revocation`](Self::approve_revocation) drives it through.
    /// Returns the record in its post-call state.
    #[instrument(skip(self))]
    pub async fn request_revocation(
        &self,
        requested_by: &str,
        secret_name: &str,
        reason: RevocationReason,
        severity: Severity,
        approval_required: bool,
        notify: Vec<String>,
    ) -> RevocationRecord {
        let record = RevocationRecord {
            id: Uuid::new_v4(),
            secret_name: secret_name.to_string(),
            reason,
            requested_by: requested_by.to_string(),
            severity,
            status: RevocationStatus::Pending,
            approval_required,
            approved_by: None,
            requested_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            notify,
        };
        self.records.write().await.insert(record.id, record.clone());
        info!(
            revocation_id = %record.id,
            secret = %secret_name,
            approval_required,
            "Revocation requested"
        );

        if approval_required {
            record
        } else {
            self.execute(record.id).await
        }
    }

    /// Approves a pending revocation and executes it.
    #[instrument(skip(self))]
    pub async fn approve_revocation(
        &self,
        id: Uuid,
        approver: &str,
    ) -> Result<RevocationRecord, RevocationError> {
        {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or(RevocationError::NotFound(id))?;
            if record.status != RevocationStatus::Pending {
                return Err(RevocationError::NotPending {
                    id,
                    status: record.status,
                });
            }
            record.approved_by = Some(approver.to_string());
        }
        Ok(self.execute(id).await)
    }

    /// Rejects a pending revocation. The vault is untouched; the record
    /// moves to `Failed` and the decision is audited as denied.
    #[instrument(skip(self))]
    pub async fn reject_revocation(
        &self,
        id: Uuid,
        approver: &str,
        reason: &str,
    ) -> Result<RevocationRecord, RevocationError> {
        let record = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or(RevocationError::NotFound(id))?;
            if record.status != RevocationStatus::Pending {
                return Err(RevocationError::NotPending {
                    id,
                    status: record.status,
                });
            }
            record.status = RevocationStatus::Failed;
            record.approved_by = Some(approver.to_string());
            record.failure_reason = Some(format!("rejected: {}", reason));
            record.completed_at = Some(Utc::now());
            record.clone()
        };

        self.audit(
            &record,
            approver,
            AuditOutcome::Denied(reason.to_string()),
        )
        .await;
        Ok(record)
    }

    /// Executes a revocation: vault delete, audit, record update,
    /// notifications. Exactly one audit entry is written per execution,
    /// matching the outcome.
    async fn execute(&self, id: Uuid) -> RevocationRecord {
        let (secret_name, actor) = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).expect("record exists during execution");
            record.status = RevocationStatus::InProgress;
            (
                record.secret_name.clone(),
                record
                    .approved_by
                    .clone()
                    .unwrap_or_else(|| record.requested_by.clone()),
            )
        };

        let deletion: Result<(), VaultError> = self.vault.delete_secret(&secret_name).await;

        let record = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).expect("record exists during execution");
            record.completed_at = Some(Utc::now());
            match &deletion {
                Ok(()) => record.status = RevocationStatus::Completed,
                Err(e) => {
                    record.status = RevocationStatus::Failed;
                    record.failure_reason = Some(e.to_string());
                }
            }
            record.clone()
        };

        let outcome = match &deletion {
            Ok(()) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.audit(&record, &actor, outcome).await;

        match &deletion {
            Ok(()) => info!(revocation_id = %id, secret = %secret_name, "Secret revoked"),
            Err(e) => warn!(
                revocation_id = %id,
                secret = %secret_name,
                "Revocation failed, no automatic retry: {}",
                e
            ),
        }

        self.send_notifications(&record).await;
        record
    }

    /// Writes the revocation audit entry; a ledger problem is logged, not
    /// propagated, so the record state stays authoritative.
    async fn audit(&self, record: &RevocationRecord, actor: &str, outcome: AuditOutcome) {
        if let Err(e) = self
            .ledger
            .log_secret_operation(
                actor,
                AuditAction::SecretRevoke,
                &record.secret_name,
                outcome,
                Some(record.id),
            )
            .await
        {
            warn!(revocation_id = %record.id, "Audit write failed: {}", e);
        }
    }

    /// Notifies recipients of the outcome. Delivery failure is logged and
    /// never escalated.
    async fn send_notifications(&self, record: &RevocationRecord) {
        let subject = format!("Secret revocation {:?}: {}", record.status, record.secret_name);
        let body = format!(
            "Revocation {} of secret '{}' requested by {} finished with status {:?}.",
            record.id, record.secret_name, record.requested_by, record.status
        );
        for recipient in &record.notify {
            if let Err(e) = self.notifier.notify(recipient, &subject, &body).await {
                warn!(
                    revocation_id = %record.id,
                    recipient = %recipient,
                    "Revocation notification failed: {}",
                    e
                );
            }
        }
    }

    /// Returns a record by id.
    pub async fn record(&self, id: Uuid) -> Option<RevocationRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Returns all records, newest first.
    pub async fn records(&self) -> Vec<RevocationRecord> {
        let mut records: Vec<RevocationRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        records
    }

    /// Returns records awaiting approval.
    pub async fn pending(&self) -> Vec<RevocationRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == RevocationStatus::Pending)
            .cloned()
            .collect()
    }
}
