//! Read-side aggregation over the audit ledger.
//!
//! Reports never fail wholesale: each section is computed independently
//! and a section that cannot be built lands in the report's error list
//! while the rest of the report is returned.

use crate::entry::{AuditAction, AuditLevel, AuditLogEntry, AuditOutcome};
use crate::ledger::{AuditLedger, AuditQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Pre-built report types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Event/level/outcome counts and top actors.
    SecuritySummary,
    /// One actor's activity over the period.
    UserActivity {
        /// Actor to report on.
        actor: String,
    },
    /// Retention coverage and privileged-operation counts.
    Compliance,
    /// Failed and denied operations.
    FailedOperations,
    /// Configuration changes.
    ConfigurationChanges,
    /// Data access and export activity.
    DataAccess,
    /// Recorded security events at warning level and above.
    AnomalyDetection,
}

/// One titled section of structured report data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section title.
    pub title: String,
    /// Structured section contents.
    pub data: serde_json::Value,
}

/// A generated report: partial results plus per-section errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// What kind of report this is.
    pub kind: ReportKind,
    /// Inclusive start of the reporting period.
    pub from: DateTime<Utc>,
    /// Exclusive end of the reporting period.
    pub to: DateTime<Utc>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Sections that were built successfully.
    pub sections: Vec<ReportSection>,
    /// Sections that failed, with reasons.
    pub errors: Vec<String>,
}

/// Builds reports from the ledger's query API.
pub struct AuditReporter {
    ledger: Arc<AuditLedger>,
}

impl AuditReporter {
    /// Creates a reporter over the given ledger.
    pub fn new(ledger: Arc<AuditLedger>) -> Self {
        Self { ledger }
    }

    /// Generates a report for `[from, to)`.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        kind: ReportKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AuditReport {
        let mut report = AuditReport {
            kind: kind.clone(),
            from,
            to,
            generated_at: Utc::now(),
            sections: Vec::new(),
            errors: Vec::new(),
        };

        let entries = self.entries_in_period(from, to, None).await;
        match kind {
            ReportKind::SecuritySummary => self.security_summary(&entries, &mut report),
            ReportKind::UserActivity { ref actor } => {
                let actor_entries: Vec<&AuditLogEntry> =
                    entries.iter().filter(|e| &e.actor == actor).collect();
                self.user_activity(actor, &actor_entries, &mut report);
            }
            ReportKind::Compliance => self.compliance(&entries, &mut report),
            ReportKind::FailedOperations => self.failed_operations(&entries, &mut report),
            ReportKind::ConfigurationChanges => {
                let changes: Vec<&AuditLogEntry> = entries
                    .iter()
                    .filter(|e| e.action == AuditAction::ConfigChange)
                    .collect();
                self.entry_listing("configuration_changes", &changes, &mut report);
            }
            ReportKind::DataAccess => self.data_access(&entries, &mut report),
            ReportKind::AnomalyDetection => self.anomaly_detection(&entries, &mut report),
        }
        report
    }

    async fn entries_in_period(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        action: Option<AuditAction>,
    ) -> Vec<AuditLogEntry> {
        self.ledger
            .query(AuditQuery {
                from: Some(from),
                to: Some(to),
                action,
                limit: usize::MAX,
                ..AuditQuery::default()
            })
            .await
            .entries
    }

    fn count_by<F>(entries: &[AuditLogEntry], f: F) -> HashMap<String, usize>
    where
        F: Fn(&AuditLogEntry) -> String,
    {
        let mut counts = HashMap::new();
        for entry in entries {
            *counts.entry(f(entry)).or_insert(0) += 1;
        }
        counts
    }

    fn top_actors(entries: &[AuditLogEntry], n: usize) -> Vec<(String, usize)> {
        let counts = Self::count_by(entries, |e| e.actor.clone());
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    fn push_section(report: &mut AuditReport, title: &str, data: serde_json::Value) {
        report.sections.push(ReportSection {
            title: title.to_string(),
            data,
        });
    }

    fn security_summary(&self, entries: &[AuditLogEntry], report: &mut AuditReport) {
        let failures = entries
            .iter()
            .filter(|e| !e.outcome.is_success())
            .count();
        let failure_ratio = if entries.is_empty() {
            0.0
        } else {
            failures as f64 / entries.len() as f64
        };

        Self::push_section(
            report,
            "totals",
            serde_json::json!({
                "entries": entries.len(),
                "failures": failures,
                "failure_ratio": failure_ratio,
            }),
        );
        Self::push_section(
            report,
            "by_action",
            serde_json::json!(Self::count_by(entries, |e| e.action.canonical())),
        );
        Self::push_section(
            report,
            "by_level",
            serde_json::json!(Self::count_by(entries, |e| e.level.to_string())),
        );
        Self::push_section(
            report,
            "top_actors",
            serde_json::json!(Self::top_actors(entries, 5)),
        );
    }

    fn user_activity(&self, actor: &str, entries: &[&AuditLogEntry], report: &mut AuditReport) {
        if entries.is_empty() {
            report
                .errors
                .push(format!("no activity recorded for actor {}", actor));
            return;
        }
        let owned: Vec<AuditLogEntry> = entries.iter().map(|e| (*e).clone()).collect();
        Self::push_section(
            report,
            "actions",
            serde_json::json!(Self::count_by(&owned, |e| e.action.canonical())),
        );
        Self::push_section(
            report,
            "resources",
            serde_json::json!(Self::count_by(&owned, |e| e.resource.clone())),
        );
        Self::push_section(
            report,
            "by_day",
            serde_json::json!(Self::count_by(&owned, |e| e
                .timestamp
                .date_naive()
                .to_string())),
        );
    }

    fn compliance(&self, entries: &[AuditLogEntry], report: &mut AuditReport) {
        let secret_ops = entries
            .iter()
            .filter(|e| {
                matches!(
                    e.action,
                    AuditAction::SecretCreate
                        | AuditAction::SecretRead
                        | AuditAction::SecretRotate
                        | AuditAction::SecretRevoke
                )
            })
            .count();
        let config_changes = entries
            .iter()
            .filter(|e| e.action == AuditAction::ConfigChange)
            .count();
        let encrypted = entries
            .iter()
            .filter(|e| e.encrypted_payload.is_some())
            .count();

        Self::push_section(
            report,
            "privileged_operations",
            serde_json::json!({
                "secret_operations": secret_ops,
                "configuration_changes": config_changes,
                "entries_with_encrypted_payload": encrypted,
            }),
        );
        Self::push_section(
            report,
            "retention",
            serde_json::json!({
                "earliest_expiry": entries.iter().map(|e| e.expires_at).min(),
                "latest_expiry": entries.iter().map(|e| e.expires_at).max(),
            }),
        );
    }

    fn failed_operations(&self, entries: &[AuditLogEntry], report: &mut AuditReport) {
        let failed: Vec<&AuditLogEntry> = entries
            .iter()
            .filter(|e| !e.outcome.is_success())
            .collect();
        let owned: Vec<AuditLogEntry> = failed.iter().map(|e| (*e).clone()).collect();
        Self::push_section(
            report,
            "by_action",
            serde_json::json!(Self::count_by(&owned, |e| e.action.canonical())),
        );
        self.entry_listing("failed_operations", &failed, report);
    }

    fn data_access(&self, entries: &[AuditLogEntry], report: &mut AuditReport) {
        let access: Vec<AuditLogEntry> = entries
            .iter()
            .filter(|e| matches!(e.action, AuditAction::DataAccess | AuditAction::DataExport))
            .cloned()
            .collect();
        Self::push_section(
            report,
            "by_actor",
            serde_json::json!(Self::count_by(&access, |e| e.actor.clone())),
        );
        Self::push_section(
            report,
            "by_resource",
            serde_json::json!(Self::count_by(&access, |e| e.resource.clone())),
        );
        Self::push_section(
            report,
            "exports",
            serde_json::json!(access
                .iter()
                .filter(|e| e.action == AuditAction::DataExport)
                .count()),
        );
    }

    fn anomaly_detection(&self, entries: &[AuditLogEntry], report: &mut AuditReport) {
        let events: Vec<AuditLogEntry> = entries
            .iter()
            .filter(|e| e.action == AuditAction::SecurityEvent && e.level >= AuditLevel::Warning)
            .cloned()
            .collect();
        Self::push_section(
            report,
            "by_event_type",
            serde_json::json!(Self::count_by(&events, |e| {
                e.metadata
                    .get("event_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string()
            })),
        );
        Self::push_section(
            report,
            "by_level",
            serde_json::json!(Self::count_by(&events, |e| e.level.to_string())),
        );
    }

    fn entry_listing(&self, title: &str, entries: &[&AuditLogEntry], report: &mut AuditReport) {
        let listing: Vec<serde_json::Value> = entries
            .iter()
            .take(100)
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "timestamp": e.timestamp,
                    "actor": e.actor,
                    "action": e.action.canonical(),
                    "resource": e.resource,
                    "outcome": match &e.outcome {
                        AuditOutcome::Success => "success".to_string(),
                        other => other.canonical(),
                    },
                    "message": e.message,
                })
            })
            .collect();
        Self::push_section(report, title, serde_json::json!(listing));
    }
}
