//! Common test utilities for integration tests.
//!
//! Certificate fixtures (rcgen, p12) and a wiremock-backed identity endpoint,
//! key vault and App Configuration store sharing one mock server.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use certvault::config::{EnvSource, ManagedIdentityEndpoint, Settings};
use certvault::secrets::{CONTENT_TYPE_PKCS12, KEY_VAULT_API_VERSION};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const VAULT: &str = "contoso-kv";
pub const ROOT_CA: &str = "root-ca";
pub const MSI_TOKEN_PATH: &str = "/msi/token";

/// A generated certificate with its PKCS#8 key.
pub struct Fixture {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

impl Fixture {
    /// Self-signed CA, as a private root would be.
    pub fn root_ca(common_name: &str) -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.distinguished_name.push(rcgen::DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).unwrap();
        Self { cert_der: cert.der().to_vec(), key_der: key_pair.serialize_der() }
    }

    /// Self-signed leaf for `localhost`, usable as a serving certificate.
    pub fn localhost() -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "localhost");
        let cert = params.self_signed(&key_pair).unwrap();
        Self { cert_der: cert.der().to_vec(), key_der: key_pair.serialize_der() }
    }

    /// PKCS#12 bundle with the empty export password, base64-encoded.
    pub fn pkcs12_base64(&self) -> String {
        let pfx = p12::PFX::new(&self.cert_der, &self.key_der, None, "", "fixture").unwrap();
        STANDARD.encode(pfx.to_der())
    }

    pub fn cer_base64(&self) -> String {
        STANDARD.encode(&self.cert_der)
    }

    pub fn thumbprint(&self) -> String {
        certvault::certificates::thumbprint(&self.cert_der)
    }
}

/// Settings pointing the vault template and the managed identity at `server`.
pub fn settings_for(server: &MockServer) -> Arc<Settings> {
    Arc::new(Settings {
        vault_url_template: format!("{}/vaults/{{vault}}", server.uri()),
        managed_identity: ManagedIdentityEndpoint::Imds {
            url: format!("{}{}", server.uri(), MSI_TOKEN_PATH),
        },
        ..Settings::default()
    })
}

pub fn env(pairs: &[(&str, &str)]) -> Arc<dyn EnvSource> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Arc::new(map)
}

/// Managed identity token endpoint, expected to be called `times` times.
pub async fn mount_identity(server: &MockServer, times: u64) {
    Mock::given(method("GET"))
        .and(path(MSI_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "kv-token",
            "expires_in": "3600",
            "token_type": "Bearer"
        })))
        .expect(times)
        .mount(server)
        .await;
}

pub async fn mount_secret(
    server: &MockServer,
    vault: &str,
    name: &str,
    value: &str,
    content_type: Option<&str>,
) {
    let mut body = json!({
        "id": format!("{}/vaults/{}/secrets/{}", server.uri(), vault, name),
        "value": value,
        "attributes": { "enabled": true }
    });
    if let Some(content_type) = content_type {
        body["contentType"] = json!(content_type);
    }
    Mock::given(method("GET"))
        .and(path(format!("/vaults/{}/secrets/{}", vault, name)))
        .and(query_param("api-version", KEY_VAULT_API_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_pkcs12_secret(server: &MockServer, vault: &str, name: &str, fixture: &Fixture) {
    mount_secret(server, vault, name, &fixture.pkcs12_base64(), Some(CONTENT_TYPE_PKCS12)).await;
}

pub async fn mount_certificate(server: &MockServer, vault: &str, name: &str, fixture: &Fixture) {
    Mock::given(method("GET"))
        .and(path(format!("/vaults/{}/certificates/{}", vault, name)))
        .and(query_param("api-version", KEY_VAULT_API_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("{}/vaults/{}/certificates/{}", server.uri(), vault, name),
            "cer": fixture.cer_base64()
        })))
        .mount(server)
        .await;
}

pub async fn mount_secret_list(server: &MockServer, vault: &str, names: &[&str]) {
    let value: Vec<_> = names
        .iter()
        .map(|name| {
            json!({
                "id": format!("{}/vaults/{}/secrets/{}", server.uri(), vault, name),
                "attributes": { "enabled": true }
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/vaults/{}/secrets", vault)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "value": value, "nextLink": null })),
        )
        .mount(server)
        .await;
}

/// App Configuration connection string for a store served by `server`.
pub fn app_config_connection_string(server: &MockServer) -> String {
    format!(
        "Endpoint={};Id=test-id;Secret={}",
        server.uri(),
        STANDARD.encode(b"app-config-secret")
    )
}

pub async fn mount_app_config(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/kv"))
        .and(query_param("key", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
        .mount(server)
        .await;
}

pub async fn mount_app_config_key(server: &MockServer, key: &str, etag: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/kv/{}", key)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": key,
            "label": null,
            "value": "1",
            "content_type": null,
            "etag": etag
        })))
        .mount(server)
        .await;
}
