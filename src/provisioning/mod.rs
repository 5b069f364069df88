//! # Provisioning
//!
//! Entry points that tie parameter resolution, the client cache, the fetcher,
//! the decoder and the trust store together:
//!
//! - [`Provisioner::install_root_ca`] adds a vault certificate to a local
//!   trust store. Safe to call on every process start.
//! - [`Provisioner::provision_serving_certificate`] returns a certificate with
//!   its key for the HTTPS listener.
//! - [`Provisioner::fetch_certificate`] decodes a vault certificate for callers
//!   that write or bind it themselves.
//! - [`Provisioner::build_configuration`] loads vault secrets (and, when
//!   configured, an App Configuration store) as process configuration.
//!
//! Missing vault or certificate names are logged and reported, never raised:
//! a deployment may skip these subsystems on purpose.

pub mod serving;

use std::sync::Arc;

use config::builder::AsyncState;
use config::ConfigBuilder;
use tracing::{info, warn, Instrument};

use crate::certificates::{decode, DecodedCertificate};
use crate::config::{
    Diagnostic, EnvSource, ProvisioningOverrides, ResolvedParameters, Settings,
    ENV_AZURE_CONNECTION_STRING,
};
use crate::configuration::{
    app_config_key, env_var_name, AppConfigurationClient, AppConfigurationSource, KeyVaultSource,
    SentinelWatcher, DEFAULT_APP_CONFIG_KEY, DEFAULT_SENTINEL_KEY,
};
use crate::errors::{Error, Result};
use crate::secrets::{
    fetch_certificate_object, fetch_secret, ClientCache, KeyVaultClientFactory, SecretPayload,
    SecretStoreClient,
};
use crate::trust_store::{OpenMode, OpenStore, StoreLocation, StoreName, TrustStore};

pub use serving::ServingCertificate;

/// Which vault item form to fetch for a root CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateSource {
    /// The secret, dispatched on its content type (PKCS#12 or PKIX).
    #[default]
    Secret,
    /// The certificate object's public part.
    CertificateObject,
}

/// Where and how to install a root CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallOptions {
    pub store_name: StoreName,
    pub store_location: StoreLocation,
    pub source: CertificateSource,
}

/// Result of [`Provisioner::install_root_ca`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { thumbprint: String, subject: String, newly_added: bool },
    /// Vault or certificate name missing. Nothing was fetched or written.
    Skipped { diagnostics: Vec<Diagnostic> },
    /// The item's content type is not a certificate format.
    Unrecognized { content_type: String },
}

/// Options for [`Provisioner::build_configuration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationOptions {
    /// `Section:Key` path holding the App Configuration connection string.
    pub app_config_key: String,
    /// Key whose change signals a reload.
    pub sentinel_key: String,
    pub include_app_configuration: bool,
}

impl Default for ConfigurationOptions {
    fn default() -> Self {
        Self {
            app_config_key: DEFAULT_APP_CONFIG_KEY.to_string(),
            sentinel_key: DEFAULT_SENTINEL_KEY.to_string(),
            include_app_configuration: true,
        }
    }
}

/// Assembled process configuration.
#[derive(Debug)]
pub struct BuiltConfiguration {
    pub config: config::Config,
    /// Present when an App Configuration store was chained.
    pub sentinel: Option<SentinelWatcher>,
}

/// Owns the client cache and the injected environment.
///
/// Build one per process and share it; tests build a fresh one each.
pub struct Provisioner {
    clients: Arc<ClientCache>,
    env: Arc<dyn EnvSource>,
    settings: Arc<Settings>,
}

impl Provisioner {
    /// A provisioner talking to the real secret store.
    pub fn new(settings: Arc<Settings>, env: Arc<dyn EnvSource>) -> Self {
        let factory = Arc::new(KeyVaultClientFactory::new(settings.clone()));
        Self::with_client_cache(Arc::new(ClientCache::new(factory)), settings, env)
    }

    pub fn with_client_cache(
        clients: Arc<ClientCache>,
        settings: Arc<Settings>,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        Self { clients, env, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client_cache(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    pub fn resolve(&self, overrides: &ProvisioningOverrides) -> ResolvedParameters {
        ResolvedParameters::resolve(overrides, self.env.as_ref())
    }

    async fn client_for(&self, params: &ResolvedParameters) -> Result<Arc<dyn SecretStoreClient>> {
        if let Some(diagnostic) = &params.connection_string.diagnostic {
            warn!(parameter = ENV_AZURE_CONNECTION_STRING, "{}", diagnostic.message);
        }
        Ok(self.clients.get_client(&params.credential_identity()).await?)
    }

    /// Fetch, decode and add a root CA to the trust store. Adding a certificate
    /// that is already present succeeds without change.
    ///
    /// The store is opened only after decoding succeeded and is closed before
    /// returning, on success and on failure.
    pub async fn install_root_ca(
        &self,
        overrides: &ProvisioningOverrides,
        trust_store: &TrustStore,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let params = self.resolve(overrides);
        let (vault_name, certificate_name) =
            match (params.vault_name.as_deref(), params.certificate_name.as_deref()) {
                (Some(vault), Some(certificate)) => (vault.to_string(), certificate.to_string()),
                _ => {
                    params.log_missing();
                    return Ok(InstallOutcome::Skipped {
                        diagnostics: params.certificate_diagnostics(),
                    });
                }
            };

        let span = crate::vault_span!("install_root_ca", &vault_name, &certificate_name);
        async {
            let client = self.client_for(&params).await?;
            let payload =
                fetch_payload(client.as_ref(), options.source, &vault_name, &certificate_name)
                    .await?;

            let certificate = match decode(&payload)? {
                Some(certificate) => certificate,
                None => return Ok(unrecognized(&payload)),
            };

            let mut store =
                trust_store.open(options.store_name, options.store_location, OpenMode::ReadWrite)?;
            let newly_added = store.add(&certificate)?;
            store.close();

            let thumbprint = certificate.thumbprint();
            info!(
                thumbprint = %thumbprint,
                subject = %certificate.info.subject,
                store = %options.store_name,
                location = %options.store_location,
                newly_added,
                "Root CA installed"
            );
            Ok::<_, Error>(InstallOutcome::Installed {
                thumbprint,
                subject: certificate.info.subject.clone(),
                newly_added,
            })
        }
        .instrument(span)
        .await
    }

    /// Fetch the PKCS#12 serving certificate. `Ok(None)` when the vault or
    /// certificate name is missing or the item is not a certificate; an error
    /// when it is a certificate without a private key.
    pub async fn provision_serving_certificate(
        &self,
        overrides: &ProvisioningOverrides,
        port: Option<u16>,
    ) -> Result<Option<ServingCertificate>> {
        let params = self.resolve(overrides);
        let (Some(vault_name), Some(certificate_name)) =
            (params.vault_name.as_deref(), params.certificate_name.as_deref())
        else {
            params.log_missing();
            return Ok(None);
        };

        let span =
            crate::vault_span!("provision_serving_certificate", vault_name, certificate_name);
        async {
            let client = self.client_for(&params).await?;
            let payload = fetch_secret(client.as_ref(), vault_name, certificate_name).await?;

            let Some(certificate) = decode(&payload)? else {
                warn!(
                    content_type = payload.content_type.as_str(),
                    "Serving certificate item is not a certificate format"
                );
                return Ok(None);
            };

            let serving =
                ServingCertificate::new(certificate, port.unwrap_or(self.settings.https_port))?;
            info!(
                thumbprint = %serving.thumbprint(),
                subject = %serving.info().subject,
                expires_at = %serving.info().not_after,
                port = serving.port(),
                "Serving certificate provisioned"
            );
            Ok::<_, Error>(Some(serving))
        }
        .instrument(span)
        .await
    }

    /// Fetch and decode a certificate without touching any store. `Ok(None)`
    /// when the vault or certificate name is missing or the item is not a
    /// certificate format.
    pub async fn fetch_certificate(
        &self,
        overrides: &ProvisioningOverrides,
        source: CertificateSource,
    ) -> Result<Option<DecodedCertificate>> {
        let params = self.resolve(overrides);
        let (Some(vault_name), Some(certificate_name)) =
            (params.vault_name.as_deref(), params.certificate_name.as_deref())
        else {
            params.log_missing();
            return Ok(None);
        };

        let span = crate::vault_span!("fetch_certificate", vault_name, certificate_name);
        async {
            let client = self.client_for(&params).await?;
            let payload =
                fetch_payload(client.as_ref(), source, vault_name, certificate_name).await?;
            let certificate = decode(&payload)?;
            match &certificate {
                Some(certificate) => info!(
                    thumbprint = %certificate.thumbprint(),
                    subject = %certificate.info.subject,
                    has_private_key = certificate.has_private_key(),
                    "Certificate fetched"
                ),
                None => warn!(
                    content_type = payload.content_type.as_str(),
                    "Vault item is not a recognized certificate format"
                ),
            }
            Ok::<_, Error>(certificate)
        }
        .instrument(span)
        .await
    }

    /// Load the vault's secrets as configuration, then chain an App
    /// Configuration store whose connection string is read from the result
    /// (or from the `Section__Key` environment variable).
    pub async fn build_configuration(
        &self,
        overrides: &ProvisioningOverrides,
        options: &ConfigurationOptions,
    ) -> Result<BuiltConfiguration> {
        let params = self.resolve(overrides);

        let vault_config = match params.vault_name.as_deref() {
            Some(vault_name) => {
                let client = self.client_for(&params).await?;
                ConfigBuilder::<AsyncState>::default()
                    .add_async_source(KeyVaultSource::new(client, vault_name))
                    .build()
                    .await?
            }
            None => {
                if let Some(diagnostic) = &params.vault_name.diagnostic {
                    warn!(parameter = %diagnostic.parameter, "{}", diagnostic.message);
                }
                config::Config::default()
            }
        };

        if !options.include_app_configuration {
            return Ok(BuiltConfiguration { config: vault_config, sentinel: None });
        }

        let connection_string = vault_config
            .get_string(&app_config_key(&options.app_config_key))
            .ok()
            .or_else(|| self.env.var(&env_var_name(&options.app_config_key)))
            .filter(|value| !value.trim().is_empty());

        let Some(connection_string) = connection_string else {
            warn!(
                key = %options.app_config_key,
                "Please specify the configuration '{}' for your App Configuration store; it can be \
                 stored as a vault secret named '{}'",
                options.app_config_key,
                options.app_config_key.replace(':', "--")
            );
            return Ok(BuiltConfiguration { config: vault_config, sentinel: None });
        };

        let client = AppConfigurationClient::from_connection_string(
            &connection_string,
            self.settings.request_timeout(),
        )?;
        let sentinel = SentinelWatcher::new(client.clone(), options.sentinel_key.clone());

        let config = ConfigBuilder::<AsyncState>::default()
            .add_source(vault_config)
            .add_async_source(AppConfigurationSource::new(client))
            .build()
            .await?;
        if let Err(e) = sentinel.prime().await {
            warn!(key = %sentinel.key(), error = %e, "Could not read configuration sentinel");
        }

        Ok(BuiltConfiguration { config, sentinel: Some(sentinel) })
    }
}

async fn fetch_payload(
    client: &dyn SecretStoreClient,
    source: CertificateSource,
    vault_name: &str,
    certificate_name: &str,
) -> Result<SecretPayload> {
    let payload = match source {
        CertificateSource::Secret => fetch_secret(client, vault_name, certificate_name).await?,
        CertificateSource::CertificateObject => {
            fetch_certificate_object(client, vault_name, certificate_name).await?
        }
    };
    Ok(payload)
}

fn unrecognized(payload: &SecretPayload) -> InstallOutcome {
    let content_type = payload.content_type.as_str().to_string();
    warn!(content_type = %content_type, "Vault item is not a recognized certificate format");
    InstallOutcome::Unrecognized { content_type }
}

/// An HTTP client that trusts the certificates of `store` in addition to the
/// built-in roots.
pub fn trusted_http_client(store: &OpenStore, settings: &Settings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(settings.request_timeout());
    for stored in store.certificates()? {
        let certificate = reqwest::Certificate::from_der(stored.der.as_ref())
            .map_err(|e| Error::internal(format!("certificate {}: {}", stored.thumbprint, e)))?;
        builder = builder.add_root_certificate(certificate);
    }
    builder.build().map_err(|e| Error::transport(format!("HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{ClientFactory, ContentType, CredentialIdentity, SecretsError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for Unreachable {
        async fn build(
            &self,
            _identity: &CredentialIdentity,
        ) -> crate::secrets::Result<Arc<dyn SecretStoreClient>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SecretsError::credential_construction("no network in this test"))
        }
    }

    fn provisioner(env: &[(&str, &str)]) -> (Provisioner, Arc<Unreachable>) {
        let factory = Arc::new(Unreachable { calls: AtomicUsize::new(0) });
        let env: HashMap<String, String> =
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let provisioner = Provisioner::with_client_cache(
            Arc::new(ClientCache::new(factory.clone())),
            Arc::new(Settings::default()),
            Arc::new(env),
        );
        (provisioner, factory)
    }

    #[tokio::test]
    async fn test_install_without_names_is_skipped_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(dir.path());
        let (provisioner, factory) = provisioner(&[]);

        let outcome = provisioner
            .install_root_ca(&ProvisioningOverrides::new(), &store, &InstallOptions::default())
            .await
            .unwrap();

        match outcome {
            InstallOutcome::Skipped { diagnostics } => {
                let names: Vec<_> = diagnostics.iter().map(|d| d.parameter.as_str()).collect();
                assert_eq!(names, vec!["KeyVaultName", "CertificateName"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("CurrentUser").exists());
    }

    #[tokio::test]
    async fn test_construction_failure_propagates_and_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(dir.path());
        let (provisioner, factory) =
            provisioner(&[("KeyVaultName", "contoso-kv"), ("CertificateName", "root-ca")]);

        for _ in 0..2 {
            let err = provisioner
                .install_root_ca(&ProvisioningOverrides::new(), &store, &InstallOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Secrets(SecretsError::CredentialConstruction { .. })));
            assert!(err.is_retryable());
        }
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_serving_certificate_skipped_when_certificate_name_missing() {
        let (provisioner, factory) = provisioner(&[("KeyVaultName", "contoso-kv")]);
        let serving = provisioner
            .provision_serving_certificate(&ProvisioningOverrides::new(), None)
            .await
            .unwrap();
        assert!(serving.is_none());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configuration_without_vault_or_app_config_is_empty() {
        let (provisioner, factory) = provisioner(&[]);
        let built = provisioner
            .build_configuration(&ProvisioningOverrides::new(), &ConfigurationOptions::default())
            .await
            .unwrap();
        assert!(built.sentinel.is_none());
        assert!(built.config.get_string("connectionstrings.appconfig").is_err());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrecognized_outcome_carries_content_type() {
        let payload = SecretPayload::new("x", ContentType::Other("text/plain".into()));
        assert_eq!(
            unrecognized(&payload),
            InstallOutcome::Unrecognized { content_type: "text/plain".into() }
        );
    }
}
