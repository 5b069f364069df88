//! # Error Handling
//!
//! Error types for certificate provisioning, defined with `thiserror`.
//!
//! Missing configuration parameters are *not* errors here: they are carried as
//! [`crate::config::Diagnostic`] values so that deployments can intentionally skip
//! the vault-backed subsystems.

pub mod certificate;
pub mod trust_store;
pub mod types;

pub use certificate::CertificateError;
pub use trust_store::TrustStoreError;
pub use types::{Error, Result};
