//! # argus-observability
//!
//! Structured logging infrastructure for Argus.
//!
//! Every Argus crate emits through `tracing`; this crate owns subscriber
//! initialization so the embedding service configures output exactly once.

pub mod logging;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
