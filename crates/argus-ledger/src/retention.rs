//! Retention policies and cold-storage archival.

use crate::entry::{AuditAction, AuditLevel, AuditLogEntry};
use crate::ledger::AuditLedger;
use crate::storage::{ColdStorage, StorageError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors from retention and archival operations.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Cold storage failed.
    #[error("Cold storage error: {0}")]
    Storage(#[from] StorageError),

    /// Archived data could not be serialized or reconstructed.
    #[error("Archive serialization error: {0}")]
    Serialization(String),
}

/// Result type for retention operations.
pub type RetentionResult<T> = Result<T, RetentionError>;

/// A retention policy over a class of audit entries.
///
/// Policies are evaluated in deterministic list order; the first policy
/// matching an entry claims it for the run.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Policy name, used in archive keys and reports.
    pub name: String,
    /// Entries older than this many days are processed.
    pub retention_days: i64,
    /// Restrict to these actions; `None` matches any action.
    pub actions: Option<Vec<AuditAction>>,
    /// Restrict to these levels; `None` matches any level.
    pub levels: Option<Vec<AuditLevel>>,
    /// Archive matches to cold storage before deleting.
    pub archive_before_delete: bool,
    /// Gzip archive blobs.
    pub compress: bool,
}

impl RetentionPolicy {
    /// Catch-all policy used as the final list element.
    pub fn default_catch_all(retention_days: i64) -> Self {
        Self {
            name: "default".to_string(),
            retention_days,
            actions: None,
            levels: None,
            archive_before_delete: true,
            compress: true,
        }
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(actions) = &self.actions {
            if !actions.contains(&entry.action) {
                return false;
            }
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&entry.level) {
                return false;
            }
        }
        true
    }

    fn archive_key(&self, day: NaiveDate) -> String {
        if self.compress {
            format!("archive/{}/{}.json.gz", self.name, day)
        } else {
            format!("archive/{}/{}.json", self.name, day)
        }
    }
}

/// Outcome of one policy within a sweep.
#[derive(Debug, Clone)]
pub struct PolicySweepOutcome {
    /// Policy name.
    pub policy: String,
    /// Entries the policy matched this run.
    pub matched: usize,
    /// Archive blobs written.
    pub archived_blobs: usize,
    /// Entries hard-deleted.
    pub deleted: usize,
    /// Error that stopped this policy, if any. Other policies in the same
    /// run are unaffected.
    pub error: Option<String>,
}

/// Report for one retention sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// When the sweep started.
    pub started_at: DateTime<Utc>,
    /// Per-policy outcomes, in policy order.
    pub outcomes: Vec<PolicySweepOutcome>,
}

impl SweepReport {
    /// Total entries deleted across all policies.
    pub fn total_deleted(&self) -> usize {
        self.outcomes.iter().map(|o| o.deleted).sum()
    }

    /// True if any policy recorded an error.
    pub fn has_errors(&self) -> bool {
        self.outcomes.iter().any(|o| o.error.is_some())
    }
}

/// Sweeps the ledger per policy and manages cold-storage archives.
pub struct RetentionManager {
    policies: Vec<RetentionPolicy>,
    ledger: Arc<AuditLedger>,
    storage: Arc<dyn ColdStorage>,
}

impl RetentionManager {
    /// Creates a manager over the given ledger and storage.
    pub fn new(
        policies: Vec<RetentionPolicy>,
        ledger: Arc<AuditLedger>,
        storage: Arc<dyn ColdStorage>,
    ) -> Self {
        Self {
            policies,
            ledger,
            storage,
        }
    }

    /// Returns the configured policies.
    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// Runs one sweep over all policies.
    ///
    /// Each policy scans entries older than its retention period, archives
    /// them (when configured) grouped by UTC day, then hard-deletes them.
    /// An archive failure aborts only that policy's deletion; the sweep
    /// always continues to the remaining policies.
    pub async fn run_sweep(&self) -> SweepReport {
        let started_at = Utc::now();
        let mut claimed: HashSet<Uuid> = HashSet::new();
        let mut outcomes = Vec::with_capacity(self.policies.len());

        for policy in &self.policies {
            outcomes.push(self.sweep_policy(policy, started_at, &mut claimed).await);
        }

        let report = SweepReport {
            started_at,
            outcomes,
        };
        info!(
            deleted = report.total_deleted(),
            errors = report.has_errors(),
            "Retention sweep complete"
        );
        report
    }

    async fn sweep_policy(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        claimed: &mut HashSet<Uuid>,
    ) -> PolicySweepOutcome {
        let cutoff = now - Duration::days(policy.retention_days);
        let candidates: Vec<AuditLogEntry> = self
            .ledger
            .entries_older_than(cutoff)
            .await
            .into_iter()
            .filter(|e| policy.matches(e) && !claimed.contains(&e.id))
            .collect();

        // First match wins: entries stay claimed even when archival fails,
        // so a later policy cannot delete what this one failed to archive.
        claimed.extend(candidates.iter().map(|e| e.id));

        let mut outcome = PolicySweepOutcome {
            policy: policy.name.clone(),
            matched: candidates.len(),
            archived_blobs: 0,
            deleted: 0,
            error: None,
        };
        if candidates.is_empty() {
            return outcome;
        }

        if policy.archive_before_delete {
            match self.archive_entries(policy, &candidates).await {
                Ok(blobs) => outcome.archived_blobs = blobs,
                Err(e) => {
                    warn!(policy = %policy.name, "Archive failed, deletion skipped: {}", e);
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            }
        }

        let ids: HashSet<Uuid> = candidates.iter().map(|e| e.id).collect();
        outcome.deleted = self.ledger.remove_entries(&ids).await;
        outcome
    }

    async fn archive_entries(
        &self,
        policy: &RetentionPolicy,
        entries: &[AuditLogEntry],
    ) -> RetentionResult<usize> {
        let mut by_day: BTreeMap<NaiveDate, Vec<&AuditLogEntry>> = BTreeMap::new();
        for entry in entries {
            by_day
                .entry(entry.timestamp.date_naive())
                .or_default()
                .push(entry);
        }

        let mut blobs = 0;
        for (day, day_entries) in by_day {
            let json = serde_json::to_vec(&day_entries)
                .map_err(|e| RetentionError::Serialization(e.to_string()))?;
            let data = if policy.compress {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(&json)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| RetentionError::Serialization(e.to_string()))?
            } else {
                json
            };

            let mut metadata = HashMap::new();
            metadata.insert("policy".to_string(), policy.name.clone());
            metadata.insert("count".to_string(), day_entries.len().to_string());
            metadata.insert("day".to_string(), day.to_string());
            metadata.insert("compressed".to_string(), policy.compress.to_string());

            self.storage
                .put(&policy.archive_key(day), data, metadata)
                .await?;
            blobs += 1;
        }
        Ok(blobs)
    }

    /// Reconstructs archived entries whose timestamps fall in
    /// `[start, end]`, optionally restricted to one policy's archives.
    /// Decompression is transparent; returned entries carry their original
    /// fields unchanged.
    pub async fn retrieve_archived(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        policy: Option<&str>,
    ) -> RetentionResult<Vec<AuditLogEntry>> {
        let prefix = match policy {
            Some(name) => format!("archive/{}/", name),
            None => "archive/".to_string(),
        };

        let mut entries = Vec::new();
        for object in self.storage.list(&prefix).await? {
            let in_range = object
                .metadata
                .get("day")
                .and_then(|d| d.parse::<NaiveDate>().ok())
                .map(|day| day >= start.date_naive() && day <= end.date_naive())
                // Without day metadata we cannot skip the blob; read it.
                .unwrap_or(true);
            if !in_range {
                continue;
            }

            let raw = self.storage.get(&object.key).await?;
            let json = if object.key.ends_with(".gz") {
                let mut decoder = GzDecoder::new(raw.as_slice());
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| RetentionError::Serialization(e.to_string()))?;
                out
            } else {
                raw
            };

            let restored: Vec<AuditLogEntry> = serde_json::from_slice(&json)
                .map_err(|e| RetentionError::Serialization(e.to_string()))?;
            entries.extend(
                restored
                    .into_iter()
                    .filter(|e| e.timestamp >= start && e.timestamp <= end),
            );
        }

        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }
}
