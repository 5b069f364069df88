//! Layered parameter resolution: explicit argument, then environment, then a
//! diagnostic describing how to supply the missing value.
//!
//! The environment is an injected [`EnvSource`] rather than `std::env`, so
//! tests can resolve against a synthetic snapshot without touching process state.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::secrets::CredentialIdentity;

/// Default vault name.
pub const ENV_KEY_VAULT_NAME: &str = "KeyVaultName";
/// Default certificate item name.
pub const ENV_CERTIFICATE_NAME: &str = "CertificateName";
/// Default credential. Absence means "use the ambient managed identity".
pub const ENV_AZURE_CONNECTION_STRING: &str = "AzureConnectionString";

/// Read-only view of named environment values.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource {
    Explicit,
    Environment,
    Missing,
}

/// Human-readable guidance emitted when a parameter could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub parameter: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of resolving one parameter. Absence is a legitimate result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: Option<String>,
    pub source: ParameterSource,
    pub diagnostic: Option<Diagnostic>,
}

impl Resolved {
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve `env_name`: the explicit value wins whenever present, otherwise the
/// named environment value, otherwise absent plus a diagnostic.
///
/// Empty or whitespace-only strings count as absent at both layers.
pub fn resolve(explicit: Option<&str>, env_name: &str, env: &dyn EnvSource) -> Resolved {
    if let Some(value) = non_empty(explicit.map(str::to_string)) {
        return Resolved { value: Some(value), source: ParameterSource::Explicit, diagnostic: None };
    }

    if let Some(value) = non_empty(env.var(env_name)) {
        return Resolved {
            value: Some(value),
            source: ParameterSource::Environment,
            diagnostic: None,
        };
    }

    Resolved {
        value: None,
        source: ParameterSource::Missing,
        diagnostic: Some(Diagnostic {
            parameter: env_name.to_string(),
            message: missing_message(env_name),
        }),
    }
}

fn missing_message(env_name: &str) -> String {
    match env_name {
        ENV_KEY_VAULT_NAME => format!(
            "No value for {env_name} detected, please either set the ENV '{env_name}' or pass \
             the vault name as parameter"
        ),
        ENV_CERTIFICATE_NAME => format!(
            "No value for {env_name} detected, please either set the ENV '{env_name}' or pass \
             the name of the requested certificate within the vault as parameter"
        ),
        ENV_AZURE_CONNECTION_STRING => format!(
            "No value for {env_name} detected, falling back to managed identity. In case of \
             authentication errors set the ENV '{env_name}' to \
             'RunAs=App;AppId={{AppId}};TenantId={{TenantId}};AppKey={{ClientSecret}}' or \
             configure a managed identity"
        ),
        other => format!(
            "No value for {other} detected, please either set the ENV '{other}' or pass the \
             value as parameter"
        ),
    }
}

/// Explicit overrides supplied by the caller; `None` defers to the environment.
#[derive(Clone, Default)]
pub struct ProvisioningOverrides {
    pub vault_name: Option<String>,
    pub certificate_name: Option<String>,
    pub connection_string: Option<String>,
}

impl fmt::Debug for ProvisioningOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningOverrides")
            .field("vault_name", &self.vault_name)
            .field("certificate_name", &self.certificate_name)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProvisioningOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vault_name(mut self, vault_name: impl Into<String>) -> Self {
        self.vault_name = Some(vault_name.into());
        self
    }

    pub fn with_certificate_name(mut self, certificate_name: impl Into<String>) -> Self {
        self.certificate_name = Some(certificate_name.into());
        self
    }

    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }
}

/// The three independently resolved provisioning parameters.
#[derive(Clone)]
pub struct ResolvedParameters {
    pub vault_name: Resolved,
    pub certificate_name: Resolved,
    pub connection_string: Resolved,
}

impl fmt::Debug for ResolvedParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedParameters")
            .field("vault_name", &self.vault_name.value)
            .field("certificate_name", &self.certificate_name.value)
            .field("connection_string", &self.connection_string.source)
            .finish()
    }
}

impl ResolvedParameters {
    pub fn resolve(overrides: &ProvisioningOverrides, env: &dyn EnvSource) -> Self {
        let params = Self {
            vault_name: resolve(overrides.vault_name.as_deref(), ENV_KEY_VAULT_NAME, env),
            certificate_name: resolve(
                overrides.certificate_name.as_deref(),
                ENV_CERTIFICATE_NAME,
                env,
            ),
            connection_string: resolve(
                overrides.connection_string.as_deref(),
                ENV_AZURE_CONNECTION_STRING,
                env,
            ),
        };
        debug!(
            vault_name = ?params.vault_name.source,
            certificate_name = ?params.certificate_name.source,
            connection_string = ?params.connection_string.source,
            "Resolved provisioning parameters"
        );
        params
    }

    /// Cache key for the secret store client. A missing connection string is
    /// not a failure: it selects the ambient managed identity.
    pub fn credential_identity(&self) -> CredentialIdentity {
        CredentialIdentity::from_connection_string(self.connection_string.value.clone())
    }

    /// Diagnostics for the vault and certificate names only.
    pub fn certificate_diagnostics(&self) -> Vec<Diagnostic> {
        [&self.vault_name, &self.certificate_name]
            .into_iter()
            .filter_map(|r| r.diagnostic.clone())
            .collect()
    }

    /// Log every missing vault/certificate parameter at warn level.
    pub fn log_missing(&self) {
        for diagnostic in self.certificate_diagnostics() {
            warn!(parameter = %diagnostic.parameter, "{}", diagnostic.message);
        }
    }
}
