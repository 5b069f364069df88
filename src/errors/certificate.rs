use thiserror::Error;

/// Errors surfaced while decoding fetched certificate material or turning it
/// into a TLS server configuration.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The secret value was not valid base64.
    #[error("Certificate payload for content type {content_type} is not valid base64: {source}")]
    InvalidBase64 {
        content_type: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The public certificate envelope could not be parsed.
    #[error("Public certificate envelope is not valid JSON: {source}")]
    InvalidEnvelope {
        #[source]
        source: serde_json::Error,
    },

    /// The PKCS#12 bundle could not be parsed or decrypted.
    #[error("PKCS#12 bundle could not be read: {reason}")]
    InvalidPkcs12 { reason: String },

    /// The payload decoded to zero bytes or to a bundle without certificates.
    #[error("Certificate payload does not contain any certificates")]
    EmptyCertificate,

    /// The DER bytes are not a well-formed X.509 certificate.
    #[error("Certificate is not a valid X.509 DER structure: {reason}")]
    InvalidDer { reason: String },

    /// A serving certificate was requested but the payload carries no private key.
    #[error("Certificate {thumbprint} has no private key and cannot be used for serving")]
    MissingPrivateKey { thumbprint: String },

    /// rustls rejected the certificate/key pair.
    #[error("Failed to build TLS server configuration: {source}")]
    TlsConfig {
        #[source]
        source: rustls::Error,
    },
}

impl CertificateError {
    pub fn invalid_pkcs12(reason: impl Into<String>) -> Self {
        Self::InvalidPkcs12 { reason: reason.into() }
    }

    pub fn invalid_der(reason: impl Into<String>) -> Self {
        Self::InvalidDer { reason: reason.into() }
    }
}
