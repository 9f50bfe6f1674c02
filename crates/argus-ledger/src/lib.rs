//! # argus-ledger
//!
//! Append-only, hash-chained audit ledger with encrypted payloads,
//! retention-governed archival, and read-side reporting.
//!
//! Every privileged action in the platform (secret operation, config
//! change, auth event, security event) lands here as an [`AuditLogEntry`]
//! whose hash chains from the previous entry, making retroactive tampering
//! detectable. The [`RetentionManager`] sweeps expired entries to cold
//! storage per policy; the [`AuditReporter`] aggregates the ledger into
//! compliance-facing reports.

pub mod entry;
pub mod ledger;
pub mod reporting;
pub mod retention;
pub mod storage;

pub use entry::{
    AuditAction, AuditEntryDraft, AuditLevel, AuditLogEntry, AuditOutcome, EncryptedPayload,
    GENESIS_HASH,
};
pub use ledger::{AuditLedger, AuditQuery, LedgerConfig, LedgerError, QueryPage};
pub use reporting::{AuditReport, AuditReporter, ReportKind, ReportSection};
pub use retention::{
    PolicySweepOutcome, RetentionError, RetentionManager, RetentionPolicy, SweepReport,
};
pub use storage::{ColdStorage, InMemoryColdStorage, LocalDirColdStorage, ObjectInfo, StorageError};
