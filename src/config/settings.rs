//! # Process Settings
//!
//! Ambient settings for the secret store binding, the local trust store and the
//! HTTPS listener. Provisioning parameters (vault, certificate, credential) are
//! resolved separately per call, see [`super::parameters`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use validator::{Validate, ValidationError};

use super::parameters::EnvSource;
use crate::errors::{Error, Result};
use crate::secrets::SecretString;

/// Fixed template used to build a vault's network address from its name.
pub const DEFAULT_VAULT_URL_TEMPLATE: &str = "https://{vault}.vault.azure.net";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const PRODUCTION_HTTPS_PORT: u16 = 443;
pub const DEVELOPMENT_HTTPS_PORT: u16 = 5001;

/// Deployment flavour; only affects defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostingEnvironment {
    #[default]
    Production,
    Development,
}

impl HostingEnvironment {
    pub fn default_https_port(&self) -> u16 {
        match self {
            Self::Production => PRODUCTION_HTTPS_PORT,
            Self::Development => DEVELOPMENT_HTTPS_PORT,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for HostingEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(Error::config(format!("Unknown hosting environment: {}", other))),
        }
    }
}

/// Managed identity token endpoint. App Service / Functions publish
/// `IDENTITY_ENDPOINT` + `IDENTITY_HEADER`; everything else uses IMDS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedIdentityEndpoint {
    Imds { url: String },
    AppService { url: String, header: SecretString },
}

impl ManagedIdentityEndpoint {
    pub fn url(&self) -> &str {
        match self {
            Self::Imds { url } | Self::AppService { url, .. } => url,
        }
    }
}

impl Default for ManagedIdentityEndpoint {
    fn default() -> Self {
        Self::Imds { url: IMDS_TOKEN_ENDPOINT.to_string() }
    }
}

fn validate_vault_url_template(template: &str) -> std::result::Result<(), ValidationError> {
    if !template.contains("{vault}") {
        return Err(ValidationError::new("vault_placeholder")
            .with_message("Vault URL template must contain '{vault}'".into()));
    }
    if !(template.starts_with("https://") || template.starts_with("http://")) {
        return Err(ValidationError::new("vault_scheme")
            .with_message("Vault URL template must be an http(s) URL".into()));
    }
    Ok(())
}

/// Ambient settings, loaded once at startup.
#[derive(Debug, Clone, Validate)]
pub struct Settings {
    /// Template with a `{vault}` placeholder
    #[validate(custom(function = "validate_vault_url_template"))]
    pub vault_url_template: String,

    /// Identity provider for client-secret credentials
    #[validate(url(message = "Authority host must be a URL"))]
    pub authority_host: String,

    pub managed_identity: ManagedIdentityEndpoint,

    /// Bound applied to every secret store / identity provider request
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub request_timeout_secs: u64,

    /// Root directory of the local trust stores, if one could be determined
    pub trust_store_dir: Option<PathBuf>,

    pub environment: HostingEnvironment,

    #[validate(range(min = 1, message = "HTTPS port must be between 1 and 65535"))]
    pub https_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_url_template: DEFAULT_VAULT_URL_TEMPLATE.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            managed_identity: ManagedIdentityEndpoint::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            trust_store_dir: None,
            environment: HostingEnvironment::Production,
            https_port: PRODUCTION_HTTPS_PORT,
        }
    }
}

impl Settings {
    /// Load settings from the given environment and validate them.
    pub fn from_env(env: &dyn EnvSource) -> Result<Self> {
        let get =
            |name: &str| env.var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("CERTVAULT_ENVIRONMENT") {
            Some(value) => value.parse()?,
            None => HostingEnvironment::default(),
        };

        let request_timeout_secs = match get("CERTVAULT_REQUEST_TIMEOUT_SECS") {
            Some(value) => value
                .parse()
                .map_err(|e| Error::config(format!("Invalid request timeout: {}", e)))?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let https_port = match get("CERTVAULT_HTTPS_PORT") {
            Some(value) => {
                value.parse().map_err(|e| Error::config(format!("Invalid HTTPS port: {}", e)))?
            }
            None => environment.default_https_port(),
        };

        let managed_identity = match (get("IDENTITY_ENDPOINT"), get("IDENTITY_HEADER")) {
            (Some(url), Some(header)) => {
                ManagedIdentityEndpoint::AppService { url, header: SecretString::new(header) }
            }
            _ => ManagedIdentityEndpoint::Imds {
                url: get("CERTVAULT_IMDS_ENDPOINT")
                    .unwrap_or_else(|| IMDS_TOKEN_ENDPOINT.to_string()),
            },
        };

        let trust_store_dir = get("CERTVAULT_TRUST_STORE_DIR").map(PathBuf::from).or_else(|| {
            get("HOME").or_else(|| get("USERPROFILE")).map(|home| {
                let mut path = PathBuf::from(home);
                path.push(".certvault");
                path.push("x509stores");
                path
            })
        });

        let settings = Self {
            vault_url_template: get("CERTVAULT_VAULT_URL_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_VAULT_URL_TEMPLATE.to_string()),
            authority_host: get("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            managed_identity,
            request_timeout_secs,
            trust_store_dir,
            environment,
            https_port,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Expand the vault URL template for one vault, without a trailing slash.
    pub fn vault_url(&self, vault_name: &str) -> String {
        self.vault_url_template.replace("{vault}", vault_name).trim_end_matches('/').to_string()
    }
}
