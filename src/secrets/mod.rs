//! Secret store access.
//!
//! The [`SecretStoreClient`] trait is the seam between provisioning and the
//! remote store. [`KeyVaultClient`] implements it over the Key Vault REST API,
//! and [`ClientCache`] memoizes one client per [`CredentialIdentity`] for the
//! life of the process.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use certvault::secrets::{fetch_secret, ClientCache, CredentialIdentity, KeyVaultClientFactory};
//!
//! let cache = ClientCache::new(Arc::new(KeyVaultClientFactory::new(settings)));
//! let raw = std::env::var("AzureConnectionString").ok();
//! let identity = CredentialIdentity::from_connection_string(raw);
//! let client = cache.get_client(&identity).await?;
//! let payload = fetch_secret(client.as_ref(), "contoso-kv", "root-ca").await?;
//! ```
//!
//! # Security Considerations
//!
//! Connection strings, app keys and bearer tokens are held in [`SecretString`]
//! and never reach logs.

pub mod cache;
pub mod client;
pub mod credential;
pub mod error;
pub mod keyvault;
pub mod token;
pub mod types;

pub use cache::{ClientCache, ClientFactory};
pub use client::{
    fetch_certificate_object, fetch_secret, ContentType, SecretPayload, SecretStoreClient,
    CONTENT_TYPE_PKCS12, CONTENT_TYPE_PKIX_CERT,
};
pub use credential::{Credential, CredentialIdentity};
pub use error::{Result, SecretsError};
pub use keyvault::{KeyVaultClient, KeyVaultClientFactory, KEY_VAULT_API_VERSION};
pub use token::TokenProvider;
pub use types::SecretString;
