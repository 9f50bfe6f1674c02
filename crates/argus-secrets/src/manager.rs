//! Audited secrets manager.
//!
//! Wraps the vault adapter so every operation, success or failure, lands
//! in the audit ledger. Secret values are never cached: each operation
//! fetches from the vault and drops the value when it returns.

use crate::vault::{SecretMetadata, SecretType, VaultClient, VaultError, VaultResult};
use argus_ledger::{AuditAction, AuditLedger, AuditOutcome};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Rotation schedule for one managed secret.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Secret this schedule applies to.
    pub secret_name: String,
    /// Rotate every this many days.
    pub rotation_days: i64,
    /// Rotate on the next scheduler tick regardless of schedule.
    pub force_on_next: bool,
    /// When the secret was last rotated.
    pub last_rotated: Option<DateTime<Utc>>,
    /// When the next rotation is due.
    pub next_rotation: DateTime<Utc>,
}

impl RotationConfig {
    /// Creates a schedule due one period from now.
    pub fn new(secret_name: impl Into<String>, rotation_days: i64) -> Self {
        Self {
            secret_name: secret_name.into(),
            rotation_days,
            force_on_next: false,
            last_rotated: None,
            next_rotation: Utc::now() + Duration::days(rotation_days),
        }
    }

    /// True if this secret should rotate now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.force_on_next || now >= self.next_rotation
    }
}

/// Vault CRUD with unconditional audit on both outcome paths.
pub struct SecretsManager {
    vault: Arc<dyn VaultClient>,
    ledger: Arc<AuditLedger>,
    rotation_configs: RwLock<HashMap<String, RotationConfig>>,
}

impl SecretsManager {
    /// Creates a manager over the given vault and ledger.
    pub fn new(vault: Arc<dyn VaultClient>, ledger: Arc<AuditLedger>) -> Self {
        Self {
            vault,
            ledger,
            rotation_configs: RwLock::new(HashMap::new()),
        }
    }

    /// Writes an audit entry, logging (never propagating) a ledger error:
    /// an audit write problem must not change the outcome of the secret
    /// operation it describes.
    async fn audit(
        &self,
        actor: &str,
        action: AuditAction,
        secret_name: &str,
        outcome: AuditOutcome,
        correlation_id: Option<Uuid>,
    ) {
        if let Err(e) = self
            .ledger
            .log_secret_operation(actor, action, secret_name, outcome, correlation_id)
            .await
        {
            warn!(secret = %secret_name, "Audit write failed: {}", e);
        }
    }

    /// Creates a secret, failing with [`VaultError::AlreadyExists`] when
    /// the name is taken; the existing value is untouched.
    ///
    /// The existence check and the write are two vault calls; the narrow
    /// race window between them is accepted because the vault versions
    /// every mutation and both outcomes are audited.
    #[instrument(skip(self, value))]
    pub async fn create_secret(
        &self,
        actor: &str,
        name: &str,
        value: &str,
        secret_type: SecretType,
        tags: HashMap<String, String>,
        ttl_days: Option<i64>,
    ) -> VaultResult<SecretMetadata> {
        match self.vault.get_secret(name).await {
            Ok(_) => {
                let err = VaultError::AlreadyExists(name.to_string());
                self.audit(
                    actor,
                    AuditAction::SecretCreate,
                    name,
                    AuditOutcome::Failure(err.to_string()),
                    None,
                )
                .await;
                return Err(err);
            }
            Err(VaultError::NotFound(_)) => {}
            Err(other) => {
                self.audit(
                    actor,
                    AuditAction::SecretCreate,
                    name,
                    AuditOutcome::Failure(other.to_string()),
                    None,
                )
                .await;
                return Err(other);
            }
        }

        let mut metadata = SecretMetadata::new(name, secret_type);
        metadata.tags = tags;
        if let Some(days) = ttl_days {
            metadata.expires_at = Some(Utc::now() + Duration::days(days));
        }

        let result = self.vault.set_secret(name, value, metadata.clone()).await;
        match result {
            Ok(version) => {
                metadata.version = version;
                self.audit(
                    actor,
                    AuditAction::SecretCreate,
                    name,
                    AuditOutcome::Success,
                    None,
                )
                .await;
                Ok(metadata)
            }
            Err(e) => {
                self.audit(
                    actor,
                    AuditAction::SecretCreate,
                    name,
                    AuditOutcome::Failure(e.to_string()),
                    None,
                )
                .await;
                Err(e)
            }
        }
    }

    /// Reads a secret value. The value is returned to the caller and not
    /// retained.
    #[instrument(skip(self))]
    pub async fn get_secret(
        &self,
        actor: &str,
        name: &str,
    ) -> VaultResult<(String, SecretMetadata)> {
        let result = self.vault.get_secret(name).await;
        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.audit(actor, AuditAction::SecretRead, name, outcome, None)
            .await;
        result
    }

    /// Rotates a secret to a new value.
    ///
    /// The current version is fetched best-effort (a read failure does not
    /// abort the rotation), the new value is written, the rotation
    /// schedule is advanced, and the outcome is audited either way.
    #[instrument(skip(self, new_value))]
    pub async fn rotate_secret(
        &self,
        actor: &str,
        name: &str,
        new_value: &str,
    ) -> VaultResult<u64> {
        let correlation_id = Uuid::new_v4();

        let metadata = match self.vault.get_secret(name).await {
            Ok((_, metadata)) => metadata,
            Err(e) => {
                warn!(secret = %name, "Could not fetch current version before rotation: {}", e);
                SecretMetadata::new(name, SecretType::Generic)
            }
        };

        let result = self.vault.set_secret(name, new_value, metadata).await;
        match &result {
            Ok(version) => {
                self.mark_rotated(name).await;
                self.audit(
                    actor,
                    AuditAction::SecretRotate,
                    name,
                    AuditOutcome::Success,
                    Some(correlation_id),
                )
                .await;
                tracing::info!(secret = %name, version, "Secret rotated");
            }
            Err(e) => {
                self.audit(
                    actor,
                    AuditAction::SecretRotate,
                    name,
                    AuditOutcome::Failure(e.to_string()),
                    Some(correlation_id),
                )
                .await;
            }
        }
        result
    }

    /// Deletes a secret. Audited on both paths.
    #[instrument(skip(self))]
    pub async fn delete_secret(&self, actor: &str, name: &str) -> VaultResult<()> {
        let result = self.vault.delete_secret(name).await;
        let outcome = match &result {
            Ok(()) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.audit(
            actor,
            AuditAction::Custom("secret_delete".to_string()),
            name,
            outcome,
            None,
        )
        .await;
        result
    }

    /// Registers (or replaces) a rotation schedule for a secret.
    pub async fn schedule_rotation(&self, config: RotationConfig) {
        self.rotation_configs
            .write()
            .await
            .insert(config.secret_name.clone(), config);
    }

    /// Flags a secret for rotation on the next scheduler tick.
    pub async fn force_rotation(&self, name: &str) -> bool {
        let mut configs = self.rotation_configs.write().await;
        match configs.get_mut(name) {
            Some(config) => {
                config.force_on_next = true;
                true
            }
            None => false,
        }
    }

    /// Returns the schedules due at `now`.
    pub async fn due_rotations(&self, now: DateTime<Utc>) -> Vec<RotationConfig> {
        self.rotation_configs
            .read()
            .await
            .values()
            .filter(|c| c.is_due(now))
            .cloned()
            .collect()
    }

    /// Returns the schedule for one secret.
    pub async fn rotation_config(&self, name: &str) -> Option<RotationConfig> {
        self.rotation_configs.read().await.get(name).cloned()
    }

    async fn mark_rotated(&self, name: &str) {
        let mut configs = self.rotation_configs.write().await;
        if let Some(config) = configs.get_mut(name) {
            let now = Utc::now();
            config.last_rotated = Some(now);
            config.next_rotation = now + Duration::days(config.rotation_days);
            config.force_on_next = false;
        }
    }
}
