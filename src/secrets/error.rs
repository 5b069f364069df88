//! Error types for secret store operations.

use thiserror::Error;

/// Result type for secret store operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while building a secret store client or fetching from it.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Building an authenticated client failed (bad credential, identity provider
    /// unreachable). Never cached: the next call constructs again.
    #[error("Failed to construct secret store client: {message}")]
    CredentialConstruction { message: String },

    /// The connection string could not be interpreted.
    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// The identity provider or secret store rejected the credential.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Network, not-found or timeout failure fetching an item.
    #[error("Secret '{item}' unavailable in vault '{vault}': {message}")]
    SecretUnavailable { vault: String, item: String, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be built or a URL was malformed.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl SecretsError {
    /// Create a credential construction error.
    pub fn credential_construction(message: impl Into<String>) -> Self {
        Self::CredentialConstruction { message: message.into() }
    }

    /// Create an invalid connection string error.
    pub fn invalid_connection_string(reason: impl Into<String>) -> Self {
        Self::InvalidConnectionString { reason: reason.into() }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create a secret unavailable error carrying vault and item for diagnosis.
    pub fn secret_unavailable(
        vault: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SecretUnavailable { vault: vault.into(), item: item.into(), message: message.into() }
    }

    /// Create an HTTP error.
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }

    /// Construction and fetch failures are eligible for retry on the next call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CredentialConstruction { .. } | Self::SecretUnavailable { .. })
    }
}
