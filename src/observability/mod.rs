//! # Observability
//!
//! Structured logging through `tracing`. Secret values never reach a log
//! line: they travel as [`crate::secrets::SecretString`].

pub mod logging;

pub use logging::{init_logging, LoggingConfig};
