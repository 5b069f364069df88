//! Secret store client trait and the payload shape it returns.

use async_trait::async_trait;
use tracing::{debug, Instrument};

use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Declared content type of a PKCS#12 bundle stored as a secret.
pub const CONTENT_TYPE_PKCS12: &str = "application/x-pkcs12";
/// Declared content type of a DER certificate wrapped in a JSON envelope.
pub const CONTENT_TYPE_PKIX_CERT: &str = "application/pkix-cert";

/// Content type tag attached to a secret by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Pkcs12,
    PkixCert,
    /// Anything else, including an absent tag (empty string).
    Other(String),
}

impl ContentType {
    /// Map a declared tag. Comparison is exact apart from surrounding
    /// whitespace and ASCII case.
    pub fn from_declared(declared: Option<&str>) -> Self {
        let declared = declared.unwrap_or_default().trim();
        if declared.eq_ignore_ascii_case(CONTENT_TYPE_PKCS12) {
            Self::Pkcs12
        } else if declared.eq_ignore_ascii_case(CONTENT_TYPE_PKIX_CERT) {
            Self::PkixCert
        } else {
            Self::Other(declared.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pkcs12 => CONTENT_TYPE_PKCS12,
            Self::PkixCert => CONTENT_TYPE_PKIX_CERT,
            Self::Other(other) => other,
        }
    }
}

/// One item as returned by the store: a raw string plus its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPayload {
    pub raw_value: SecretString,
    pub content_type: ContentType,
}

impl SecretPayload {
    pub fn new(raw_value: impl Into<String>, content_type: ContentType) -> Self {
        Self { raw_value: SecretString::new(raw_value), content_type }
    }
}

/// An authenticated handle to the secret store.
///
/// A handle is bound to one credential and shared by every caller using that
/// credential; implementations must be safe for concurrent fetches.
///
/// Implementations MUST NOT log secret values.
#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Fetch a secret with its declared content type.
    async fn get_secret(&self, vault_name: &str, name: &str) -> Result<SecretPayload>;

    /// Fetch the public part of a certificate object. The payload is always a
    /// `PkixCert` envelope.
    async fn get_certificate(&self, vault_name: &str, name: &str) -> Result<SecretPayload>;

    /// Names of every enabled secret in the vault.
    async fn list_secrets(&self, vault_name: &str) -> Result<Vec<String>>;
}

fn require_names(vault_name: &str, item_name: &str) -> Result<()> {
    if vault_name.trim().is_empty() || item_name.trim().is_empty() {
        return Err(SecretsError::secret_unavailable(
            vault_name,
            item_name,
            "vault and item names must not be empty",
        ));
    }
    Ok(())
}

/// Fetch a secret item through `client`.
pub async fn fetch_secret(
    client: &dyn SecretStoreClient,
    vault_name: &str,
    item_name: &str,
) -> Result<SecretPayload> {
    require_names(vault_name, item_name)?;
    let span = crate::vault_span!("get_secret", vault_name, item_name);
    async {
        let payload = client.get_secret(vault_name, item_name).await?;
        debug!(content_type = payload.content_type.as_str(), "Fetched secret");
        Ok::<_, SecretsError>(payload)
    }
    .instrument(span)
    .await
}

/// Fetch a certificate object (public certificate only) through `client`.
pub async fn fetch_certificate_object(
    client: &dyn SecretStoreClient,
    vault_name: &str,
    item_name: &str,
) -> Result<SecretPayload> {
    require_names(vault_name, item_name)?;
    let span = crate::vault_span!("get_certificate", vault_name, item_name);
    async {
        let payload = client.get_certificate(vault_name, item_name).await?;
        debug!("Fetched certificate object");
        Ok::<_, SecretsError>(payload)
    }
    .instrument(span)
    .await
}
