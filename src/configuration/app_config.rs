//! App Configuration store access: HMAC-signed REST reads, a `config` source
//! over every key-value, and a sentinel watcher for refresh.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use config::{AsyncSource, ConfigError, Map, Value};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::app_config_key;
use crate::secrets::{Result, SecretString, SecretsError};

pub const APP_CONFIG_API_VERSION: &str = "1.0";
/// Sentinel key whose change triggers a configuration reload.
pub const DEFAULT_SENTINEL_KEY: &str = "RefreshSettingsTrigger";

const FEATURE_FLAG_PREFIX: &str = ".appconfig.featureflag/";
const KEY_VAULT_REFERENCE_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.keyvaultref+json";
const SIGNED_HEADERS: &str = "x-ms-date;host;x-ms-content-sha256";
const KV_SET_ACCEPT: &str = "application/vnd.microsoft.appconfig.kvset+json, application/json";
/// Requests use the "no label" filter.
const NULL_LABEL: &str = "\0";

type HmacSha256 = Hmac<Sha256>;

/// Parsed `Endpoint=...;Id=...;Secret=...` connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfigConnection {
    pub endpoint: url::Url,
    pub id: String,
    secret: SecretString,
}

impl fmt::Debug for AppConfigConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfigConnection")
            .field("endpoint", &self.endpoint.as_str())
            .field("id", &self.id)
            .finish()
    }
}

impl AppConfigConnection {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut id = None;
        let mut secret = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                SecretsError::invalid_connection_string(
                    "expected key=value segments separated by ';'",
                )
            })?;
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "id" => id = Some(value.trim().to_string()),
                "secret" => secret = Some(SecretString::new(value.trim())),
                _ => {}
            }
        }

        let missing = |part: &str| {
            SecretsError::invalid_connection_string(format!(
                "App Configuration connection string is missing {}",
                part
            ))
        };
        let endpoint = endpoint.ok_or_else(|| missing("Endpoint"))?;
        let endpoint = url::Url::parse(&endpoint).map_err(|e| {
            SecretsError::invalid_connection_string(format!("invalid Endpoint: {}", e))
        })?;
        let id = id.ok_or_else(|| missing("Id"))?;
        let secret = secret.ok_or_else(|| missing("Secret"))?;
        if STANDARD.decode(secret.expose_secret()).is_err() {
            return Err(SecretsError::invalid_connection_string("Secret is not valid base64"));
        }

        Ok(Self { endpoint, id, secret })
    }

    fn store_name(&self) -> String {
        self.endpoint.host_str().unwrap_or("app-configuration").to_string()
    }
}

/// One key-value as returned by the store.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub label: Option<String>,
    pub value: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyValuePage {
    #[serde(default)]
    items: Vec<KeyValue>,
    #[serde(rename = "@nextLink")]
    next_link: Option<String>,
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Signed REST client for one App Configuration store.
#[derive(Clone)]
pub struct AppConfigurationClient {
    connection: AppConfigConnection,
    http: reqwest::Client,
}

impl fmt::Debug for AppConfigurationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfigurationClient").field("connection", &self.connection).finish()
    }
}

impl AppConfigurationClient {
    pub fn new(connection: AppConfigConnection, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SecretsError::http(format!("HTTP client: {}", e)))?;
        Ok(Self { connection, http })
    }

    pub fn from_connection_string(raw: &str, timeout: Duration) -> Result<Self> {
        Self::new(AppConfigConnection::parse(raw)?, timeout)
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.connection.endpoint
    }

    /// `Authorization`, `x-ms-date` and `x-ms-content-sha256` for a bodiless GET.
    fn sign(&self, url: &url::Url, date: &str) -> Result<(String, String)> {
        let content_hash = STANDARD.encode(Sha256::digest(b""));
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let string_to_sign =
            format!("GET\n{}\n{};{};{}", path_and_query, date, host_header(url), content_hash);

        let key = STANDARD
            .decode(self.connection.secret.expose_secret())
            .map_err(|_| SecretsError::invalid_connection_string("Secret is not valid base64"))?;
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| SecretsError::credential_construction(format!("HMAC key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let authorization = format!(
            "HMAC-SHA256 Credential={}&SignedHeaders={}&Signature={}",
            self.connection.id, SIGNED_HEADERS, signature
        );
        Ok((authorization, content_hash))
    }

    async fn get(&self, url: url::Url, item: &str) -> Result<Option<reqwest::Response>> {
        let date = rfc1123_now();
        let (authorization, content_hash) = self.sign(&url, &date)?;
        let store = self.connection.store_name();

        let response = self
            .http
            .get(url)
            .header("x-ms-date", &date)
            .header("x-ms-content-sha256", &content_hash)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::ACCEPT, KV_SET_ACCEPT)
            .send()
            .await
            .map_err(|e| {
                let message =
                    if e.is_timeout() { "request timed out".to_string() } else { e.to_string() };
                SecretsError::secret_unavailable(&store, item, message)
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if matches!(status.as_u16(), 401 | 403) {
            return Err(SecretsError::authentication(format!(
                "App Configuration store '{}' rejected the request: {}",
                store, status
            )));
        }
        if !status.is_success() {
            return Err(SecretsError::secret_unavailable(&store, item, status.to_string()));
        }
        Ok(Some(response))
    }

    fn kv_url(&self, path_segment: Option<&str>, key_filter: Option<&str>) -> Result<url::Url> {
        let mut url = self.connection.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SecretsError::http("App Configuration endpoint cannot have a path"))?;
            segments.pop_if_empty().push("kv");
            if let Some(key) = path_segment {
                segments.push(key);
            }
        }
        {
            let mut query = url.query_pairs_mut();
            if let Some(filter) = key_filter {
                query.append_pair("key", filter);
            }
            query.append_pair("label", NULL_LABEL);
            query.append_pair("api-version", APP_CONFIG_API_VERSION);
        }
        Ok(url)
    }

    /// Every unlabeled key-value, following `@nextLink`. A missing listing is
    /// an error; only single-key reads treat 404 as absence.
    pub async fn list_key_values(&self) -> Result<Vec<KeyValue>> {
        let store = self.connection.store_name();
        let mut items = Vec::new();
        let mut next = Some(self.kv_url(None, Some("*"))?);

        while let Some(url) = next.take() {
            let response = self.get(url, "*").await?.ok_or_else(|| {
                SecretsError::secret_unavailable(&store, "*", "404 Not Found")
            })?;
            let page: KeyValuePage = response.json().await.map_err(|e| {
                SecretsError::secret_unavailable(&store, "*", format!("malformed response: {}", e))
            })?;
            items.extend(page.items);
            next = match page.next_link.filter(|link| !link.is_empty()) {
                Some(link) => Some(self.next_page_url(&link, &store)?),
                None => None,
            };
        }

        debug!(store = %store, count = items.len(), "Listed App Configuration key-values");
        Ok(items)
    }

    fn next_page_url(&self, link: &str, store: &str) -> Result<url::Url> {
        let url = self.connection.endpoint.join(link).map_err(|e| {
            SecretsError::secret_unavailable(store, "*", format!("bad @nextLink: {}", e))
        })?;
        if url.origin() != self.connection.endpoint.origin() {
            return Err(SecretsError::secret_unavailable(
                store,
                "*",
                "@nextLink points outside the store",
            ));
        }
        Ok(url)
    }

    /// One unlabeled key-value, `None` when it does not exist.
    pub async fn get_key_value(&self, key: &str) -> Result<Option<KeyValue>> {
        let store = self.connection.store_name();
        let url = self.kv_url(Some(key), None)?;
        match self.get(url, key).await? {
            Some(response) => response.json().await.map(Some).map_err(|e| {
                SecretsError::secret_unavailable(&store, key, format!("malformed response: {}", e))
            }),
            None => Ok(None),
        }
    }
}

/// `config` source exposing every unlabeled key-value. Key `:` separators
/// become `.`; feature flags and Key Vault references are skipped.
#[derive(Debug, Clone)]
pub struct AppConfigurationSource {
    client: AppConfigurationClient,
}

impl AppConfigurationSource {
    pub fn new(client: AppConfigurationClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AppConfigurationClient {
        &self.client
    }
}

#[async_trait]
impl AsyncSource for AppConfigurationSource {
    async fn collect(&self) -> std::result::Result<Map<String, Value>, ConfigError> {
        let items =
            self.client.list_key_values().await.map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        let origin = self.client.endpoint().to_string();

        let mut map = Map::new();
        for item in items {
            if item.key.starts_with(FEATURE_FLAG_PREFIX) {
                continue;
            }
            let is_reference = item
                .content_type
                .as_deref()
                .map(|ct| ct.to_ascii_lowercase().starts_with(KEY_VAULT_REFERENCE_CONTENT_TYPE))
                .unwrap_or(false);
            if is_reference {
                warn!(
                    key = %item.key,
                    "Skipping Key Vault reference; load the vault as a source instead"
                );
                continue;
            }
            if let Some(value) = item.value {
                map.insert(app_config_key(&item.key), Value::new(Some(&origin), value));
            }
        }

        info!(store = %origin, count = map.len(), "Loaded App Configuration entries");
        Ok(map)
    }
}

/// Watches one sentinel key and reports when its etag changes.
#[derive(Debug)]
pub struct SentinelWatcher {
    client: AppConfigurationClient,
    key: String,
    last_etag: Mutex<Option<Option<String>>>,
}

impl SentinelWatcher {
    pub fn new(client: AppConfigurationClient, key: impl Into<String>) -> Self {
        Self { client, key: key.into(), last_etag: Mutex::new(None) }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record the current etag without reporting a change.
    pub async fn prime(&self) -> Result<()> {
        let etag = self.current_etag().await?;
        *self.last_etag.lock().await = Some(etag);
        Ok(())
    }

    /// `true` when the sentinel's etag differs from the last observation.
    /// The first observation never counts as a change.
    pub async fn check(&self) -> Result<bool> {
        let etag = self.current_etag().await?;
        let mut last = self.last_etag.lock().await;
        let changed = matches!(last.as_ref(), Some(previous) if *previous != etag);
        *last = Some(etag);
        if changed {
            info!(key = %self.key, "Configuration sentinel changed");
        }
        Ok(changed)
    }

    async fn current_etag(&self) -> Result<Option<String>> {
        Ok(self.client.get_key_value(&self.key).await?.and_then(|kv| kv.etag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "c2VjcmV0LWtleS1tYXRlcmlhbA==";

    #[test]
    fn test_connection_string_parsing() {
        let connection = AppConfigConnection::parse(&format!(
            "Endpoint=https://contoso.azconfig.io;Id=abc-1;Secret={SECRET}"
        ))
        .unwrap();
        assert_eq!(connection.endpoint.as_str(), "https://contoso.azconfig.io/");
        assert_eq!(connection.id, "abc-1");
        assert_eq!(connection.secret.expose_secret(), SECRET);
        assert!(!format!("{:?}", connection).contains(SECRET));
    }

    #[test]
    fn test_connection_string_rejections() {
        for raw in [
            "Id=a;Secret=c2VjcmV0",
            "Endpoint=https://x.azconfig.io;Secret=c2VjcmV0",
            "Endpoint=https://x.azconfig.io;Id=a",
            "Endpoint=https://x.azconfig.io;Id=a;Secret=***",
            "Endpoint=not a url;Id=a;Secret=c2VjcmV0",
        ] {
            assert!(
                matches!(
                    AppConfigConnection::parse(raw),
                    Err(SecretsError::InvalidConnectionString { .. })
                ),
                "expected rejection for {raw}"
            );
        }
    }

    #[test]
    fn test_signature_matches_reference_computation() {
        let client = AppConfigurationClient::from_connection_string(
            &format!("Endpoint=https://contoso.azconfig.io;Id=abc-1;Secret={SECRET}"),
            Duration::from_secs(5),
        )
        .unwrap();
        let url = client.kv_url(None, Some("*")).unwrap();
        let date = "Tue, 01 Oct 2024 10:00:00 GMT";
        let (authorization, content_hash) = client.sign(&url, date).unwrap();

        assert_eq!(content_hash, "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");

        let expected_string = format!(
            "GET\n/kv?key=*&label=%00&api-version=1.0\n{};contoso.azconfig.io;{}",
            date, content_hash
        );
        let mut mac = HmacSha256::new_from_slice(&STANDARD.decode(SECRET).unwrap()).unwrap();
        mac.update(expected_string.as_bytes());
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        let signed_headers = "SignedHeaders=x-ms-date;host;x-ms-content-sha256";
        assert_eq!(
            authorization,
            format!("HMAC-SHA256 Credential=abc-1&{}&Signature={}", signed_headers, expected)
        );
    }

    #[test]
    fn test_host_header_keeps_non_default_port() {
        let local = url::Url::parse("http://127.0.0.1:8080/kv").unwrap();
        let hosted = url::Url::parse("https://contoso.azconfig.io/kv").unwrap();
        assert_eq!(host_header(&local), "127.0.0.1:8080");
        assert_eq!(host_header(&hosted), "contoso.azconfig.io");
    }

    fn client_for(server: &MockServer) -> AppConfigurationClient {
        AppConfigurationClient::from_connection_string(
            &format!("Endpoint={};Id=abc-1;Secret={SECRET}", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_listing_is_unavailable_not_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        match client_for(&server).list_key_values().await.unwrap_err() {
            SecretsError::SecretUnavailable { item, message, .. } => {
                assert_eq!(item, "*");
                assert!(message.contains("404"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kv/RefreshSettingsTrigger"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let value = client_for(&server).get_key_value("RefreshSettingsTrigger").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_next_link_to_another_host_is_rejected() {
        let server = MockServer::start().await;
        let elsewhere = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [ { "key": "Service:Name", "value": "orders" } ],
                "@nextLink": format!("{}/kv?after=1", elsewhere.uri())
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).list_key_values().await.unwrap_err();
        assert!(matches!(err, SecretsError::SecretUnavailable { .. }), "{err}");
        assert!(elsewhere.received_requests().await.unwrap_or_default().is_empty());
    }
}
