use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;
use x509_parser::prelude::*;

use crate::errors::CertificateError;
use crate::secrets::{ContentType, SecretPayload};

/// Metadata extracted from the leaf certificate for logging and lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Parse metadata from one DER certificate. Trailing bytes are rejected.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let (rest, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertificateError::invalid_der(e.to_string()))?;
        if !rest.is_empty() {
            return Err(CertificateError::invalid_der(format!(
                "{} trailing bytes after certificate",
                rest.len()
            )));
        }

        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: to_utc(validity.not_before.timestamp())?,
            not_after: to_utc(validity.not_after.timestamp())?,
            is_ca: cert.is_ca(),
        })
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, CertificateError> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| {
            CertificateError::invalid_der(format!("validity timestamp {} out of range", timestamp))
        })
}

/// Uppercase hex SHA-1 of the DER encoding, as shown by certificate stores.
pub fn thumbprint(der: &[u8]) -> String {
    hex::encode_upper(digest(&SHA1_FOR_LEGACY_USE_ONLY, der).as_ref())
}

/// PEM armour with 64-column base64 lines and `\n` line endings.
pub fn to_pem(der: &[u8]) -> String {
    let block = ::pem::Pem::new("CERTIFICATE", der.to_vec());
    ::pem::encode_config(&block, ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF))
}

/// A certificate normalized for trust-store insertion or TLS binding.
#[derive(Debug)]
pub struct DecodedCertificate {
    pub leaf: CertificateDer<'static>,
    /// Remaining certificates from the bundle, leaf excluded.
    pub chain: Vec<CertificateDer<'static>>,
    pub private_key: Option<PrivateKeyDer<'static>>,
    pub info: CertificateInfo,
}

impl DecodedCertificate {
    pub fn thumbprint(&self) -> String {
        thumbprint(self.leaf.as_ref())
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Leaf followed by the chain, as presented by a TLS server.
    pub fn full_chain(&self) -> Vec<CertificateDer<'static>> {
        std::iter::once(self.leaf.clone()).chain(self.chain.iter().cloned()).collect()
    }

    /// The leaf certificate alone, PEM armoured.
    pub fn leaf_pem(&self) -> String {
        to_pem(self.leaf.as_ref())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvelopeData {
    Base64(String),
    Bytes(Vec<u8>),
}

/// DER bytes carried in the envelope's `Data` field, either as a base64 string
/// or as an array of byte values.
#[derive(Deserialize)]
#[serde(try_from = "EnvelopeData")]
struct EnvelopeBytes(Vec<u8>);

impl TryFrom<EnvelopeData> for EnvelopeBytes {
    type Error = base64::DecodeError;

    fn try_from(data: EnvelopeData) -> Result<Self, Self::Error> {
        match data {
            EnvelopeData::Bytes(bytes) => Ok(Self(bytes)),
            EnvelopeData::Base64(text) => STANDARD.decode(text.trim()).map(Self),
        }
    }
}

#[derive(Deserialize)]
struct PkixEnvelope {
    #[serde(rename = "Data", alias = "data")]
    data: EnvelopeBytes,
}

/// Certificate material after the content-type dispatch, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificatePayload {
    /// Raw PKCS#12 bundle bytes.
    Pkcs12(Vec<u8>),
    /// Raw DER certificate bytes, unwrapped from the JSON envelope.
    PkixCert(Vec<u8>),
    /// Any other declared content type.
    Unrecognized(String),
}

impl CertificatePayload {
    /// Unwrap a fetched payload according to its declared content type only.
    pub fn from_secret(payload: &SecretPayload) -> Result<Self, CertificateError> {
        let raw = payload.raw_value.expose_secret();
        match &payload.content_type {
            ContentType::Pkcs12 => {
                let bytes = STANDARD.decode(raw.trim()).map_err(|source| {
                    CertificateError::InvalidBase64 {
                        content_type: payload.content_type.as_str().to_string(),
                        source,
                    }
                })?;
                Ok(Self::Pkcs12(bytes))
            }
            ContentType::PkixCert => {
                let envelope: PkixEnvelope = serde_json::from_str(raw)
                    .map_err(|source| CertificateError::InvalidEnvelope { source })?;
                Ok(Self::PkixCert(envelope.data.0))
            }
            ContentType::Other(other) => Ok(Self::Unrecognized(other.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_is_uppercase_sha1() {
        // SHA-1("abc")
        assert_eq!(thumbprint(b"abc"), "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn test_pem_wraps_at_64_columns() {
        let pem = to_pem(&[0u8; 100]);
        let body: Vec<&str> = pem.lines().skip(1).take_while(|l| !l.starts_with("-----")).collect();
        assert_eq!(body.len(), 3);
        assert!(body.iter().all(|line| line.len() <= 64));
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(!pem.contains('\r'));
    }

    #[test]
    fn test_pem_reads_back_through_rustls() {
        use rustls::pki_types::pem::PemObject;

        let der: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let decoded = CertificateDer::from_pem_slice(to_pem(&der).as_bytes()).unwrap();
        assert_eq!(decoded.as_ref(), der.as_slice());
    }

    #[test]
    fn test_envelope_accepts_string_and_byte_array() {
        let expected = CertificatePayload::PkixCert(vec![1, 2, 3]);

        let b64 = SecretPayload::new(r#"{"Data":"AQID"}"#, ContentType::PkixCert);
        assert_eq!(CertificatePayload::from_secret(&b64).unwrap(), expected);

        let bytes = SecretPayload::new(r#"{"Data":[1,2,3]}"#, ContentType::PkixCert);
        assert_eq!(CertificatePayload::from_secret(&bytes).unwrap(), expected);
    }

    #[test]
    fn test_envelope_with_bad_base64_is_invalid_envelope() {
        let payload = SecretPayload::new(r#"{"Data":"@@@"}"#, ContentType::PkixCert);
        assert!(matches!(
            CertificatePayload::from_secret(&payload),
            Err(CertificateError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn test_unrecognized_content_type_is_not_interpreted() {
        let content_type = ContentType::Other("text/plain".into());
        let payload = SecretPayload::new("not even base64 !!", content_type);
        assert_eq!(
            CertificatePayload::from_secret(&payload).unwrap(),
            CertificatePayload::Unrecognized("text/plain".into())
        );
    }

    #[test]
    fn test_bad_pkcs12_base64_is_an_error() {
        let payload = SecretPayload::new("@@@", ContentType::Pkcs12);
        assert!(matches!(
            CertificatePayload::from_secret(&payload),
            Err(CertificateError::InvalidBase64 { .. })
        ));
    }

    #[test]
    fn test_invalid_der_rejected() {
        assert!(matches!(
            CertificateInfo::from_der(&[0x30, 0x03, 0x01]),
            Err(CertificateError::InvalidDer { .. })
        ));
    }
}
