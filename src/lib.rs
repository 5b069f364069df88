//! # certvault
//!
//! Fetches certificates and configuration from a cloud key vault and installs
//! them where a service needs them: the local trust store for outbound TLS, an
//! HTTPS listener for inbound TLS, and the process configuration.
//!
//! ## Flow
//!
//! ```text
//! overrides + environment ──► ResolvedParameters
//!                                  │ credential identity
//!                                  ▼
//!                             ClientCache ──► SecretStoreClient ──► SecretPayload
//!                                                                       │
//!                                                                       ▼
//!                                              decode ──► DecodedCertificate
//!                                                          │            │
//!                                                    TrustStore   ServingCertificate
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use certvault::config::{ProcessEnv, ProvisioningOverrides, Settings};
//! use certvault::provisioning::{InstallOptions, Provisioner};
//! use certvault::trust_store::TrustStore;
//!
//! # async fn run() -> certvault::Result<()> {
//! let settings = Arc::new(Settings::from_env(&ProcessEnv)?);
//! let provisioner = Provisioner::new(settings.clone(), Arc::new(ProcessEnv));
//! let store = TrustStore::from_settings(&settings)?;
//! provisioner
//!     .install_root_ca(&ProvisioningOverrides::new(), &store, &InstallOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod certificates;
pub mod cli;
pub mod config;
pub mod configuration;
pub mod errors;
pub mod observability;
pub mod provisioning;
pub mod secrets;
pub mod server;
pub mod trust_store;

pub use config::{ProvisioningOverrides, Settings};
pub use errors::{Error, Result};
pub use provisioning::{InstallOptions, InstallOutcome, Provisioner, ServingCertificate};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
