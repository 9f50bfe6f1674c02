//! # argus-core
//!
//! Core building blocks for the Argus security operations system.
//!
//! This crate provides the shared security event model, the authenticated
//! encryption primitive with versioned key indirection, and the
//! scheduled-task abstraction used by all background loops.

pub mod crypto;
pub mod event;
pub mod scheduler;

pub use crypto::{CryptoError, EnvelopeCipher, KeyRegistry, PBKDF2_MIN_ITERATIONS};
pub use event::{EventOutcome, SecurityEvent, SecurityEventType, Severity};
pub use scheduler::{SchedulerError, TaskHandle, TaskSupervisor};
