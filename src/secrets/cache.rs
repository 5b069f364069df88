//! Process-wide memoization of secret store clients, keyed by credential.
//!
//! Each [`CredentialIdentity`] maps to at most one client for the life of the
//! process. Entries are never evicted or refreshed: a new credential needs a
//! restart. Concurrent first calls for the same identity share one
//! construction; a failed construction leaves the slot empty so the next call
//! tries again.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use certvault::secrets::{ClientCache, CredentialIdentity, KeyVaultClientFactory};
//!
//! let cache = ClientCache::new(Arc::new(KeyVaultClientFactory::new(settings)));
//! let client = cache.get_client(&CredentialIdentity::ManagedIdentity).await?;
//! let again = cache.get_client(&CredentialIdentity::ManagedIdentity).await?;
//! assert!(Arc::ptr_eq(&client, &again));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::client::SecretStoreClient;
use super::credential::CredentialIdentity;
use super::error::Result;

/// Builds an authenticated client for one credential. This is the only place
/// identity provider cost is paid.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn build(&self, identity: &CredentialIdentity) -> Result<Arc<dyn SecretStoreClient>>;
}

type Slot = Arc<OnceCell<Arc<dyn SecretStoreClient>>>;

/// Strict memoization map from credential to client.
pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    slots: DashMap<CredentialIdentity, Slot>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory, slots: DashMap::new() }
    }

    /// Return the client for `identity`, constructing it on first use.
    pub async fn get_client(
        &self,
        identity: &CredentialIdentity,
    ) -> Result<Arc<dyn SecretStoreClient>> {
        // Clone the slot out so no map shard lock is held across the await.
        let slot: Slot = self.slots.entry(identity.clone()).or_default().value().clone();

        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        let client = slot
            .get_or_try_init(|| async {
                debug!(identity = identity.kind(), "Constructing secret store client");
                self.factory.build(identity).await.inspect_err(|e| {
                    warn!(
                        identity = identity.kind(),
                        error = %e,
                        "Secret store client construction failed"
                    );
                })
            })
            .await?;

        Ok(client.clone())
    }

    /// Number of identities with a constructed client.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::client::SecretPayload;
    use crate::secrets::SecretsError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl SecretStoreClient for Noop {
        async fn get_secret(&self, vault: &str, name: &str) -> Result<SecretPayload> {
            Err(SecretsError::secret_unavailable(vault, name, "noop"))
        }

        async fn get_certificate(&self, vault: &str, name: &str) -> Result<SecretPayload> {
            Err(SecretsError::secret_unavailable(vault, name, "noop"))
        }

        async fn list_secrets(&self, _vault: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Counting {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for Counting {
        async fn build(
            &self,
            _identity: &CredentialIdentity,
        ) -> Result<Arc<dyn SecretStoreClient>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(Noop))
        }
    }

    #[tokio::test]
    async fn test_same_identity_returns_same_handle() {
        let factory = Arc::new(Counting::default());
        let cache = ClientCache::new(factory.clone());

        let first = cache.get_client(&CredentialIdentity::ManagedIdentity).await.unwrap();
        let second = cache.get_client(&CredentialIdentity::ManagedIdentity).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_identities_get_distinct_handles() {
        let factory = Arc::new(Counting::default());
        let cache = ClientCache::new(factory.clone());
        let a = CredentialIdentity::from_connection_string(Some("RunAs=App;AppId=a".into()));
        let b = CredentialIdentity::from_connection_string(Some("RunAs=App;AppId=b".into()));

        let client_a = cache.get_client(&a).await.unwrap();
        let client_b = cache.get_client(&b).await.unwrap();
        let client_mi = cache.get_client(&CredentialIdentity::ManagedIdentity).await.unwrap();

        assert!(!Arc::ptr_eq(&client_a, &client_b));
        assert!(!Arc::ptr_eq(&client_a, &client_mi));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_constructs_once() {
        let factory = Arc::new(Counting::default());
        let cache = Arc::new(ClientCache::new(factory.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.get_client(&CredentialIdentity::ManagedIdentity).await.map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    struct FailOnce {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for FailOnce {
        async fn build(
            &self,
            _identity: &CredentialIdentity,
        ) -> Result<Arc<dyn SecretStoreClient>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SecretsError::credential_construction("identity provider unreachable"));
            }
            Ok(Arc::new(Noop))
        }
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let factory = Arc::new(FailOnce { attempts: AtomicUsize::new(0) });
        let cache = ClientCache::new(factory.clone());

        let err = cache.get_client(&CredentialIdentity::ManagedIdentity).await.err().unwrap();
        assert!(matches!(err, SecretsError::CredentialConstruction { .. }));
        assert!(cache.is_empty());

        cache.get_client(&CredentialIdentity::ManagedIdentity).await.unwrap();
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }
}
