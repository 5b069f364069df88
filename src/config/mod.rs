//! # Configuration Management
//!
//! Two layers:
//! - [`parameters`]: per-call resolution of vault name, certificate name and
//!   credential (explicit override, then environment, then a diagnostic).
//! - [`settings`]: ambient process settings (endpoints, timeouts, trust store
//!   location, listener port), validated with `validator`.

pub mod parameters;
pub mod settings;

pub use parameters::{
    resolve, Diagnostic, EnvSource, ParameterSource, ProcessEnv, ProvisioningOverrides, Resolved,
    ResolvedParameters, ENV_AZURE_CONNECTION_STRING, ENV_CERTIFICATE_NAME, ENV_KEY_VAULT_NAME,
};
pub use settings::{HostingEnvironment, ManagedIdentityEndpoint, Settings};
