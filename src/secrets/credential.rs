//! Credential identity (the client cache key) and connection string parsing.
//!
//! Supported `AzureConnectionString` shapes:
//!
//! | Connection string | Credential |
//! |---|---|
//! | `RunAs=App;AppId={id};TenantId={tenant};AppKey={secret}` | client secret |
//! | `RunAs=App` | system-assigned managed identity |
//! | `RunAs=App;AppId={id}` | user-assigned managed identity |
//!
//! Developer tool and certificate based variants are rejected.

use std::collections::HashMap;

use super::error::{Result, SecretsError};
use super::types::SecretString;

/// How to authenticate to the secret store.
///
/// Only ever compared by equality: two connection strings that mean the same
/// thing but differ textually are different identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialIdentity {
    ConnectionString(SecretString),
    /// No connection string: use the environment-provided managed identity.
    ManagedIdentity,
}

impl CredentialIdentity {
    pub fn from_connection_string(value: Option<String>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => Self::ConnectionString(SecretString::new(value)),
            None => Self::ManagedIdentity,
        }
    }

    /// Non-secret label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionString(_) => "connection_string",
            Self::ManagedIdentity => "managed_identity",
        }
    }

    /// Interpret the identity as a concrete credential.
    pub fn credential(&self) -> Result<Credential> {
        match self {
            Self::ManagedIdentity => Ok(Credential::ManagedIdentity { client_id: None }),
            Self::ConnectionString(value) => parse_connection_string(value.expose_secret()),
        }
    }
}

/// A parsed credential, ready for token acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ClientSecret { tenant_id: String, client_id: String, client_secret: SecretString },
    ManagedIdentity { client_id: Option<String> },
}

fn parse_connection_string(raw: &str) -> Result<Credential> {
    let mut pairs: HashMap<String, String> = HashMap::new();
    for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            SecretsError::invalid_connection_string("expected key=value segments separated by ';'")
        })?;
        pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let run_as = pairs
        .get("runas")
        .ok_or_else(|| SecretsError::invalid_connection_string("missing RunAs"))?;

    if !run_as.eq_ignore_ascii_case("App") {
        return Err(SecretsError::invalid_connection_string(format!(
            "RunAs={} is not supported, use RunAs=App",
            run_as
        )));
    }

    if pairs.contains_key("certificatethumbprint") || pairs.contains_key("certificatesubjectname")
    {
        return Err(SecretsError::invalid_connection_string(
            "certificate credentials are not supported, use AppKey or a managed identity",
        ));
    }

    let client_id = pairs.get("appid").cloned().filter(|v| !v.is_empty());

    match pairs.get("appkey").filter(|v| !v.is_empty()) {
        Some(app_key) => {
            let client_id = client_id
                .ok_or_else(|| SecretsError::invalid_connection_string("AppKey requires AppId"))?;
            let tenant_id = pairs
                .get("tenantid")
                .cloned()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    SecretsError::invalid_connection_string("AppKey requires TenantId")
                })?;
            Ok(Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret: SecretString::new(app_key.clone()),
            })
        }
        None => Ok(Credential::ManagedIdentity { client_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(value: &str) -> CredentialIdentity {
        CredentialIdentity::from_connection_string(Some(value.to_string()))
    }

    #[test]
    fn test_absent_or_blank_connection_string_is_managed_identity() {
        assert_eq!(
            CredentialIdentity::from_connection_string(None),
            CredentialIdentity::ManagedIdentity
        );
        assert_eq!(
            CredentialIdentity::from_connection_string(Some("   ".into())),
            CredentialIdentity::ManagedIdentity
        );
    }

    #[test]
    fn test_client_secret_connection_string() {
        let credential = identity("RunAs=App;AppId=app-1;TenantId=tenant-1;AppKey=s3cret")
            .credential()
            .unwrap();
        assert_eq!(
            credential,
            Credential::ClientSecret {
                tenant_id: "tenant-1".into(),
                client_id: "app-1".into(),
                client_secret: SecretString::new("s3cret"),
            }
        );
    }

    #[test]
    fn test_keys_are_case_insensitive_and_trailing_separator_ok() {
        let credential =
            identity("runas=app; appid=app-1 ;tenantId=t;APPKEY=k;").credential().unwrap();
        assert!(matches!(credential, Credential::ClientSecret { .. }));
    }

    #[test]
    fn test_managed_identity_variants() {
        assert_eq!(
            identity("RunAs=App").credential().unwrap(),
            Credential::ManagedIdentity { client_id: None }
        );
        assert_eq!(
            identity("RunAs=App;AppId=user-assigned").credential().unwrap(),
            Credential::ManagedIdentity { client_id: Some("user-assigned".into()) }
        );
    }

    #[test]
    fn test_unsupported_connection_strings() {
        for raw in [
            "RunAs=Developer;DeveloperTool=AzureCli",
            "RunAs=CurrentUser",
            "AppId=a;AppKey=b",
            "RunAs=App;AppKey=secret;TenantId=t",
            "RunAs=App;AppId=a;AppKey=secret",
            "RunAs=App;AppId=a;TenantId=t;CertificateThumbprint=ABC",
            "garbage",
        ] {
            let err = identity(raw).credential().unwrap_err();
            assert!(
                matches!(err, SecretsError::InvalidConnectionString { .. }),
                "expected rejection for {raw}"
            );
        }
    }

    #[test]
    fn test_identity_kind_never_leaks_value() {
        let id = identity("RunAs=App;AppKey=hunter2");
        assert_eq!(id.kind(), "connection_string");
        assert!(!format!("{:?}", id).contains("hunter2"));
    }
}
