//! Azure Key Vault REST implementation of [`SecretStoreClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::cache::ClientFactory;
use super::client::{ContentType, SecretPayload, SecretStoreClient};
use super::credential::CredentialIdentity;
use super::error::{Result, SecretsError};
use super::token::TokenProvider;
use crate::config::Settings;

pub const KEY_VAULT_API_VERSION: &str = "7.4";

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CertificateBundle {
    cer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretAttributes {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SecretItem {
    id: String,
    attributes: Option<SecretAttributes>,
}

#[derive(Debug, Deserialize)]
struct SecretListResult {
    #[serde(default)]
    value: Vec<SecretItem>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Authenticated Key Vault handle. One instance serves any number of vaults
/// for the credential it was built with.
pub struct KeyVaultClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    settings: Arc<Settings>,
}

impl std::fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("flow", &self.tokens.flow())
            .field("vault_url_template", &self.settings.vault_url_template)
            .finish()
    }
}

impl KeyVaultClient {
    /// Parse the credential and acquire a first token. Any failure here is a
    /// construction failure.
    pub async fn connect(identity: &CredentialIdentity, settings: Arc<Settings>) -> Result<Self> {
        let credential = identity
            .credential()
            .map_err(|e| SecretsError::credential_construction(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| SecretsError::credential_construction(format!("HTTP client: {}", e)))?;

        let tokens = TokenProvider::new(http.clone(), &credential, &settings);
        tokens.token().await.map_err(|e| match e {
            SecretsError::CredentialConstruction { .. } => e,
            other => SecretsError::credential_construction(other.to_string()),
        })?;

        info!(identity = identity.kind(), flow = tokens.flow(), "Secret store client constructed");
        Ok(Self { http, tokens, settings })
    }

    fn item_url(
        &self,
        vault_name: &str,
        collection: &str,
        name: Option<&str>,
    ) -> Result<url::Url> {
        let base = self.settings.vault_url(vault_name);
        let mut url = url::Url::parse(&base)
            .map_err(|e| SecretsError::http(format!("Invalid vault URL '{}': {}", base, e)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SecretsError::http(format!("Vault URL '{}' cannot have a path", base))
            })?;
            segments.pop_if_empty().push(collection);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        url.query_pairs_mut().append_pair("api-version", KEY_VAULT_API_VERSION);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: url::Url,
        vault_name: &str,
        item: &str,
    ) -> Result<T> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                let message =
                    if e.is_timeout() { "request timed out".to_string() } else { e.to_string() };
                SecretsError::secret_unavailable(vault_name, item, message)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.code.unwrap_or_else(|| status.to_string()),
                        e.message.unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| status.to_string());

            if matches!(status.as_u16(), 401 | 403) {
                return Err(SecretsError::authentication(format!(
                    "vault '{}' denied access to '{}': {}",
                    vault_name, item, detail
                )));
            }
            return Err(SecretsError::secret_unavailable(vault_name, item, detail));
        }

        response.json::<T>().await.map_err(|e| {
            SecretsError::secret_unavailable(vault_name, item, format!("malformed response: {}", e))
        })
    }
}

#[async_trait]
impl SecretStoreClient for KeyVaultClient {
    async fn get_secret(&self, vault_name: &str, name: &str) -> Result<SecretPayload> {
        let url = self.item_url(vault_name, "secrets", Some(name))?;
        let bundle: SecretBundle = self.get_json(url, vault_name, name).await?;
        let value = bundle.value.ok_or_else(|| {
            SecretsError::secret_unavailable(vault_name, name, "secret has no value")
        })?;
        Ok(SecretPayload::new(value, ContentType::from_declared(bundle.content_type.as_deref())))
    }

    async fn get_certificate(&self, vault_name: &str, name: &str) -> Result<SecretPayload> {
        let url = self.item_url(vault_name, "certificates", Some(name))?;
        let bundle: CertificateBundle = self.get_json(url, vault_name, name).await?;
        let cer = bundle.cer.ok_or_else(|| {
            SecretsError::secret_unavailable(vault_name, name, "certificate has no public part")
        })?;
        let envelope = serde_json::json!({ "Data": cer });
        Ok(SecretPayload::new(serde_json::to_string(&envelope)?, ContentType::PkixCert))
    }

    async fn list_secrets(&self, vault_name: &str) -> Result<Vec<String>> {
        let first = self.item_url(vault_name, "secrets", None)?;
        let origin = first.origin();
        let mut names = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page: SecretListResult = self.get_json(url, vault_name, "*").await?;
            pages += 1;
            names.extend(
                page.value
                    .into_iter()
                    .filter(|item| item.attributes.as_ref().and_then(|a| a.enabled).unwrap_or(true))
                    .filter_map(|item| secret_name_from_id(&item.id)),
            );
            next = match page.next_link.filter(|link| !link.is_empty()) {
                Some(link) => Some(next_page_url(&link, &origin, vault_name)?),
                None => None,
            };
        }

        debug!(vault = vault_name, pages, count = names.len(), "Listed secrets");
        Ok(names)
    }
}

/// Parse a `nextLink`. The bearer token is only ever sent back to the vault
/// that issued the page.
fn next_page_url(link: &str, origin: &url::Origin, vault_name: &str) -> Result<url::Url> {
    let url = url::Url::parse(link).map_err(|e| {
        SecretsError::secret_unavailable(vault_name, "*", format!("bad nextLink: {}", e))
    })?;
    if &url.origin() != origin {
        return Err(SecretsError::secret_unavailable(
            vault_name,
            "*",
            format!("nextLink '{}' points outside the vault", url.origin().ascii_serialization()),
        ));
    }
    Ok(url)
}

/// `https://{vault}/secrets/{name}[/{version}]` -> `name`
fn secret_name_from_id(id: &str) -> Option<String> {
    let url = url::Url::parse(id).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "secrets")?;
    segments.next().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Builds [`KeyVaultClient`]s for the client cache.
#[derive(Debug, Clone)]
pub struct KeyVaultClientFactory {
    settings: Arc<Settings>,
}

impl KeyVaultClientFactory {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClientFactory for KeyVaultClientFactory {
    async fn build(&self, identity: &CredentialIdentity) -> Result<Arc<dyn SecretStoreClient>> {
        let client = KeyVaultClient::connect(identity, self.settings.clone()).await?;
        Ok(Arc::new(client))
    }
}
