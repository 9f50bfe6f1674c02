//! Audit entry model and hash computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Hash anchoring the first entry of a ledger.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Separator between canonical fields when hashing. A control character
/// keeps field values from colliding into each other.
const FIELD_SEP: u8 = 0x1f;

/// A single append-only audit record.
///
/// Entries are never updated after being written; deletion happens only
/// through the retention manager. `entry_hash` must always be recomputable
/// from the stored fields plus `previous_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// Position in the chain, assigned by the ledger. Retention deletions
    /// leave gaps; mutation and reordering do not.
    pub sequence: u64,
    /// Correlates entries belonging to one logical operation.
    pub correlation_id: Option<Uuid>,
    /// Timestamp when the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Who performed the action.
    pub actor: String,
    /// What was done.
    pub action: AuditAction,
    /// What it was done to.
    pub resource: String,
    /// Entry level.
    pub level: AuditLevel,
    /// Outcome of the audited operation.
    pub outcome: AuditOutcome,
    /// Human-readable description.
    pub message: String,
    /// Additional queryable metadata (stored unencrypted).
    pub metadata: HashMap<String, serde_json::Value>,
    /// Sensitive payload, encrypted before storage.
    pub encrypted_payload: Option<EncryptedPayload>,
    /// Hash of the previous entry in the chain.
    pub previous_hash: String,
    /// SHA-256 over this entry's canonical fields and `previous_hash`.
    pub entry_hash: String,
    /// When this entry becomes eligible for retention processing.
    pub expires_at: DateTime<Utc>,
}

/// An encrypted sensitive payload with the id of the key that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Registry id of the encryption key.
    pub key_id: String,
    /// Base64 nonce-prefixed ciphertext.
    pub blob: String,
}

/// Auditable action kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// User or service login.
    Login,
    /// User or service logout.
    Logout,
    /// Read of a protected resource.
    DataAccess,
    /// Data leaving the platform boundary.
    DataExport,
    /// Configuration value changed.
    ConfigChange,
    /// Secret created.
    SecretCreate,
    /// Secret value read.
    SecretRead,
    /// Secret rotated to a new value.
    SecretRotate,
    /// Secret revoked and deleted.
    SecretRevoke,
    /// A pipeline security event was recorded.
    SecurityEvent,
    /// Caller-defined action.
    Custom(String),
}

impl AuditAction {
    /// Canonical string used for hashing and storage keys.
    pub fn canonical(&self) -> String {
        match self {
            AuditAction::Login => "login".to_string(),
            AuditAction::Logout => "logout".to_string(),
            AuditAction::DataAccess => "data_access".to_string(),
            AuditAction::DataExport => "data_export".to_string(),
            AuditAction::ConfigChange => "config_change".to_string(),
            AuditAction::SecretCreate => "secret_create".to_string(),
            AuditAction::SecretRead => "secret_read".to_string(),
            AuditAction::SecretRotate => "secret_rotate".to_string(),
            AuditAction::SecretRevoke => "secret_revoke".to_string(),
            AuditAction::SecurityEvent => "security_event".to_string(),
            AuditAction::Custom(name) => format!("custom:{}", name),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditLevel::Info => write!(f, "info"),
            AuditLevel::Warning => write!(f, "warning"),
            AuditLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of an audited operation. Failure is a first-class outcome:
/// a failed secret rotation still produces an entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure(String),
    Denied(String),
}

impl AuditOutcome {
    /// Canonical string used for hashing.
    pub fn canonical(&self) -> String {
        match self {
            AuditOutcome::Success => "success".to_string(),
            AuditOutcome::Failure(reason) => format!("failure:{}", reason),
            AuditOutcome::Denied(reason) => format!("denied:{}", reason),
        }
    }

    /// True for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, AuditOutcome::Success)
    }
}

/// Caller-provided fields for a new entry; the ledger assigns identity,
/// sequence, hashes, and expiry, and encrypts the sensitive payload.
#[derive(Debug, Clone)]
pub struct AuditEntryDraft {
    /// Who performed the action.
    pub actor: String,
    /// What was done.
    pub action: AuditAction,
    /// What it was done to.
    pub resource: String,
    /// Entry level.
    pub level: AuditLevel,
    /// Outcome of the operation.
    pub outcome: AuditOutcome,
    /// Human-readable description.
    pub message: String,
    /// Queryable metadata, stored unencrypted.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Sensitive payload to encrypt before storage.
    pub sensitive: Option<serde_json::Value>,
    /// Correlation id for multi-entry operations.
    pub correlation_id: Option<Uuid>,
    /// Retention override in days; `None` uses the ledger default.
    pub retention_days: Option<i64>,
}

impl AuditEntryDraft {
    /// Creates a draft with required fields and empty extras.
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor: actor.into(),
            action,
            resource: resource.into(),
            level: AuditLevel::Info,
            outcome,
            message: String::new(),
            metadata: HashMap::new(),
            sensitive: None,
            correlation_id: None,
            retention_days: None,
        }
    }

    /// Sets the entry level.
    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Adds a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attaches a sensitive payload for encryption.
    pub fn with_sensitive(mut self, payload: serde_json::Value) -> Self {
        self.sensitive = Some(payload);
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Overrides the retention period.
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = Some(days);
        self
    }
}

/// Computes the SHA-256 chain hash for an entry.
///
/// The digest covers every stored field in a fixed order, joined by a
/// control-character separator, followed by the previous entry's hash.
/// Metadata keys are sorted so the encoding is deterministic regardless
/// of map iteration order.
pub fn compute_entry_hash(entry: &AuditLogEntry) -> String {
    let mut hasher = Sha256::new();
    let mut push = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update([FIELD_SEP]);
    };

    push(&entry.id.to_string());
    push(&entry.sequence.to_string());
    push(
        &entry
            .correlation_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    );
    push(&entry.timestamp.to_rfc3339());
    push(&entry.actor);
    push(&entry.action.canonical());
    push(&entry.resource);
    push(&entry.level.to_string());
    push(&entry.outcome.canonical());
    push(&entry.message);

    let sorted: BTreeMap<&String, &serde_json::Value> = entry.metadata.iter().collect();
    for (key, value) in sorted {
        push(key);
        push(&value.to_string());
    }

    if let Some(payload) = &entry.encrypted_payload {
        push(&payload.key_id);
        push(&payload.blob);
    }
    push(&entry.expires_at.to_rfc3339());
    push(&entry.previous_hash);

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_entry() -> AuditLogEntry {
        let now = Utc::now();
        let mut entry = AuditLogEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            correlation_id: None,
            timestamp: now,
            actor: "dispatcher".to_string(),
            action: AuditAction::DataAccess,
            resource: "/records/1".to_string(),
            level: AuditLevel::Info,
            outcome: AuditOutcome::Success,
            message: "read record".to_string(),
            metadata: HashMap::new(),
            encrypted_payload: None,
            previous_hash: GENESIS_HASH.to_string(),
            entry_hash: String::new(),
            expires_at: now + Duration::days(2555),
        };
        entry.entry_hash = compute_entry_hash(&entry);
        entry
    }

    #[test]
    fn test_hash_is_recomputable() {
        let entry = sample_entry();
        assert_eq!(compute_entry_hash(&entry), entry.entry_hash);
    }

    #[test]
    fn test_mutating_a_field_changes_hash() {
        let mut entry = sample_entry();
        entry.actor = "intruder".to_string();
        assert_ne!(compute_entry_hash(&entry), entry.entry_hash);
    }

    #[test]
    fn test_metadata_order_is_canonical() {
        let mut a = sample_entry();
        a.metadata.insert("zeta".to_string(), serde_json::json!(1));
        a.metadata.insert("alpha".to_string(), serde_json::json!(2));
        let hash_a = compute_entry_hash(&a);

        let mut b = a.clone();
        b.metadata = HashMap::new();
        b.metadata.insert("alpha".to_string(), serde_json::json!(2));
        b.metadata.insert("zeta".to_string(), serde_json::json!(1));
        assert_eq!(compute_entry_hash(&b), hash_a);
    }

    #[test]
    fn test_previous_hash_feeds_chain() {
        let mut entry = sample_entry();
        entry.previous_hash = "f".repeat(64);
        assert_ne!(compute_entry_hash(&entry), entry.entry_hash);
    }

    #[test]
    fn test_outcome_canonical_includes_reason() {
        assert_eq!(AuditOutcome::Success.canonical(), "success");
        assert_eq!(
            AuditOutcome::Failure("timeout".to_string()).canonical(),
            "failure:timeout"
        );
        assert_eq!(
            AuditOutcome::Denied("no grant".to_string()).canonical(),
            "denied:no grant"
        );
    }
}
