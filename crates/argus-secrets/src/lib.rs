//! # argus-secrets
//!
//! Secrets lifecycle management for Argus: a versioned vault adapter with
//! an in-memory test double, an audited secrets manager, a rotation
//! scheduler, and an emergency revocation workflow. Every operation,
//! success or failure, writes to the audit ledger.

pub mod manager;
pub mod revocation;
pub mod rotation;
pub mod vault;

pub use manager::{RotationConfig, SecretsManager};
pub use revocation::{
    EmergencyRevocation, RevocationError, RevocationReason, RevocationRecord, RevocationStatus,
};
pub use rotation::{RandomSecretGenerator, RotationOutcome, RotationScheduler, SecretGenerator};
pub use vault::{
    HttpVault, HttpVaultConfig, InMemoryVault, SecretMetadata, SecretType, VaultClient,
    VaultError, VaultResult,
};
