//! # argus-runtime
//!
//! Assembles the Argus security operations subsystem (event pipeline,
//! audit ledger, secrets lifecycle) into one [`SecurityOps`] context
//! constructed at startup and passed to the embedding service. There is
//! no global state: everything the subsystem owns hangs off this context,
//! and `start`/`stop` bound the lifetime of its background tasks.

pub mod context;

pub use context::{
    RuntimeError, SecurityOps, SecurityOpsBuilder, SecurityOpsConfig, TaskIntervals,
};

pub use argus_observability::{init_logging, init_logging_with_config, LoggingConfig};
