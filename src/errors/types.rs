//! # Error Types
//!
//! Crate-wide error enum. Lower layers keep their own typed errors and are
//! wrapped here with `#[from]` so callers can still match on the failure class.

use crate::secrets::SecretsError;

use super::{CertificateError, TrustStoreError};

/// Custom result type for certvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for certvault
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Secret store errors (credential construction, unavailable secrets, auth)
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// Certificate decoding and TLS material errors
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Local trust store errors
    #[error(transparent)]
    TrustStore(#[from] TrustStoreError),

    /// Network transport errors (listener binding, serving)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a process restart (or a later call) may succeed where this failed.
    ///
    /// Credential construction and fetch failures are never cached, so the
    /// next call retries them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Secrets(e) => e.is_retryable(),
            Error::Transport(_) | Error::Io(_) => true,
            _ => false,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::config("missing vault url template");
        assert!(matches!(error, Error::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: missing vault url template");
    }

    #[test]
    fn test_validation_error_field() {
        let error = Error::validation_field("must be between 1 and 300", "request_timeout_secs");
        if let Error::Validation { field, .. } = error {
            assert_eq!(field, Some("request_timeout_secs".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_secrets_error_is_transparent() {
        let error: Error = SecretsError::secret_unavailable("contoso-kv", "root-ca", "404").into();
        assert!(error.to_string().contains("contoso-kv"));
        assert!(error.to_string().contains("root-ca"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::transport("bind failed").is_retryable());
        assert!(!Error::validation("bad port").is_retryable());
        assert!(!Error::from(TrustStoreError::ReadOnly).is_retryable());
    }
}
