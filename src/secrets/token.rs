//! Bearer token acquisition for the secret store.
//!
//! Client-secret credentials use the OAuth2 client credentials grant against the
//! configured authority. Managed identities use IMDS or the App Service identity
//! endpoint. Tokens are cached and renewed shortly before they expire.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::credential::Credential;
use super::error::{Result, SecretsError};
use super::types::SecretString;
use crate::config::{ManagedIdentityEndpoint, Settings};

/// OAuth2 scope for the secret store data plane.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";
/// Resource identifier used by the managed identity endpoints.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lifetime {
    Seconds(u64),
    Text(String),
}

impl Lifetime {
    fn seconds(&self) -> Option<u64> {
        match self {
            Self::Seconds(secs) => Some(*secs),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<Lifetime>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

struct AccessToken {
    value: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

enum TokenSource {
    ClientSecret { token_url: String, client_id: String, client_secret: SecretString },
    ManagedIdentity { endpoint: ManagedIdentityEndpoint, client_id: Option<String> },
}

/// Acquires and caches bearer tokens for one credential.
pub struct TokenProvider {
    http: reqwest::Client,
    source: TokenSource,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, credential: &Credential, settings: &Settings) -> Self {
        let source = match credential {
            Credential::ClientSecret { tenant_id, client_id, client_secret } => {
                TokenSource::ClientSecret {
                    token_url: format!(
                        "{}/{}/oauth2/v2.0/token",
                        settings.authority_host.trim_end_matches('/'),
                        tenant_id
                    ),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                }
            }
            Credential::ManagedIdentity { client_id } => TokenSource::ManagedIdentity {
                endpoint: settings.managed_identity.clone(),
                client_id: client_id.clone(),
            },
        };
        Self { http, source, cached: Mutex::new(None) }
    }

    pub fn flow(&self) -> &'static str {
        match &self.source {
            TokenSource::ClientSecret { .. } => "client_credentials",
            TokenSource::ManagedIdentity { endpoint: ManagedIdentityEndpoint::Imds { .. }, .. } => {
                "managed_identity_imds"
            }
            TokenSource::ManagedIdentity {
                endpoint: ManagedIdentityEndpoint::AppService { .. }, ..
            } => "managed_identity_app_service",
        }
    }

    /// Returns a token valid for at least the refresh margin, fetching a new
    /// one when the cached token is missing or about to expire.
    pub async fn token(&self) -> Result<SecretString> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.acquire().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn acquire(&self) -> Result<AccessToken> {
        let request = match &self.source {
            TokenSource::ClientSecret { token_url, client_id, client_secret } => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("grant_type", "client_credentials")
                    .append_pair("client_id", client_id)
                    .append_pair("client_secret", client_secret.expose_secret())
                    .append_pair("scope", KEY_VAULT_SCOPE)
                    .finish();
                self.http
                    .post(token_url)
                    .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body)
            }
            TokenSource::ManagedIdentity { endpoint, client_id } => {
                let api_version = match endpoint {
                    ManagedIdentityEndpoint::Imds { .. } => IMDS_API_VERSION,
                    ManagedIdentityEndpoint::AppService { .. } => APP_SERVICE_API_VERSION,
                };
                let mut url = url::Url::parse(endpoint.url()).map_err(|e| {
                    SecretsError::http(format!("Invalid managed identity endpoint: {}", e))
                })?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("api-version", api_version);
                    query.append_pair("resource", KEY_VAULT_RESOURCE);
                    if let Some(id) = client_id {
                        query.append_pair("client_id", id);
                    }
                }
                let request = self.http.get(url);
                match endpoint {
                    ManagedIdentityEndpoint::Imds { .. } => request.header("Metadata", "true"),
                    ManagedIdentityEndpoint::AppService { header, .. } => {
                        request.header("X-IDENTITY-HEADER", header.expose_secret())
                    }
                }
            }
        };

        let response = request.send().await.map_err(|e| {
            SecretsError::credential_construction(format!(
                "Identity provider unreachable ({}): {}",
                self.flow(),
                e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<TokenErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.error_description.or(body.error))
                .unwrap_or_else(|| status.to_string());
            return Err(if status.is_client_error() {
                SecretsError::authentication(format!(
                    "Identity provider rejected the credential ({}): {}",
                    self.flow(),
                    detail
                ))
            } else {
                SecretsError::credential_construction(format!(
                    "Identity provider failed ({}): {}",
                    self.flow(),
                    detail
                ))
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            SecretsError::credential_construction(format!("Malformed token response: {}", e))
        })?;

        let lifetime = body
            .expires_in
            .as_ref()
            .and_then(Lifetime::seconds)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        debug!(flow = self.flow(), lifetime_secs = lifetime.as_secs(), "Acquired access token");

        Ok(AccessToken {
            value: SecretString::new(body.access_token),
            expires_at: Instant::now() + lifetime,
        })
    }
}
