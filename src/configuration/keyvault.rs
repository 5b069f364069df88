use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use config::{AsyncSource, ConfigError, Map, Value};
use tracing::{info, Instrument};

use super::keyvault_key;
use crate::secrets::{fetch_secret, SecretStoreClient};

/// `config` source loading every enabled secret of one vault.
///
/// `ConnectionStrings--AppConfig` is exposed as `connectionstrings.appconfig`.
/// Secrets are fetched one after another.
#[derive(Clone)]
pub struct KeyVaultSource {
    client: Arc<dyn SecretStoreClient>,
    vault_name: String,
}

impl KeyVaultSource {
    pub fn new(client: Arc<dyn SecretStoreClient>, vault_name: impl Into<String>) -> Self {
        Self { client, vault_name: vault_name.into() }
    }
}

impl fmt::Debug for KeyVaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultSource").field("vault_name", &self.vault_name).finish()
    }
}

#[async_trait]
impl AsyncSource for KeyVaultSource {
    async fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let span = crate::vault_span!("load_configuration", &self.vault_name);
        async {
            let names = self
                .client
                .list_secrets(&self.vault_name)
                .await
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;

            let origin = format!("keyvault:{}", self.vault_name);
            let mut map = Map::new();
            for name in names {
                let payload = fetch_secret(self.client.as_ref(), &self.vault_name, &name)
                    .await
                    .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
                map.insert(
                    keyvault_key(&name),
                    Value::new(Some(&origin), payload.raw_value.expose_secret().to_string()),
                );
            }

            info!(count = map.len(), "Loaded vault secrets as configuration");
            Ok::<_, ConfigError>(map)
        }
        .instrument(span)
        .await
    }
}
