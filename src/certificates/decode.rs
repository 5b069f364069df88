//! Content-type driven certificate decoding.
//!
//! The declared content type is the only thing that selects a decoding path.
//! The payload shape is never sniffed. A payload labeled
//! `application/pkix-cert` that does not hold a DER certificate (for example a
//! mislabeled PKCS#12 bundle) decodes to nothing rather than to a certificate.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, warn};

use super::model::{CertificateInfo, CertificatePayload, DecodedCertificate};
use crate::errors::CertificateError;
use crate::secrets::SecretPayload;

/// Password the secret store applies to exported PKCS#12 bundles.
pub const PKCS12_EXPORT_PASSWORD: &str = "";

/// Decode a fetched payload.
///
/// `Ok(None)` means no certificate was produced: the content type is not a
/// certificate format, or a PKIX payload does not hold a certificate. Errors
/// mean a PKCS#12 payload did not parse.
pub fn decode(payload: &SecretPayload) -> Result<Option<DecodedCertificate>, CertificateError> {
    let unwrapped = match CertificatePayload::from_secret(payload) {
        Ok(unwrapped) => unwrapped,
        Err(CertificateError::InvalidEnvelope { source }) => {
            warn!(error = %source, "Public certificate payload is not a valid envelope");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match unwrapped {
        CertificatePayload::Pkcs12(bytes) => {
            decode_pkcs12(&bytes, PKCS12_EXPORT_PASSWORD).map(Some)
        }
        CertificatePayload::PkixCert(der) => match decode_der(der) {
            Ok(certificate) => Ok(Some(certificate)),
            Err(e) => {
                warn!(error = %e, "Public certificate payload does not hold a DER certificate");
                Ok(None)
            }
        },
        CertificatePayload::Unrecognized(content_type) => {
            debug!(content_type = %content_type, "Payload is not a recognized certificate format");
            Ok(None)
        }
    }
}

/// A single DER certificate without a key.
pub fn decode_der(der: Vec<u8>) -> Result<DecodedCertificate, CertificateError> {
    if der.is_empty() {
        return Err(CertificateError::EmptyCertificate);
    }
    let info = CertificateInfo::from_der(&der)?;
    Ok(DecodedCertificate {
        leaf: CertificateDer::from(der),
        chain: Vec::new(),
        private_key: None,
        info,
    })
}

/// A PKCS#12 bundle. The leaf is the first non-CA certificate, or the first
/// certificate when every entry is a CA.
pub fn decode_pkcs12(bytes: &[u8], password: &str) -> Result<DecodedCertificate, CertificateError> {
    if bytes.is_empty() {
        return Err(CertificateError::EmptyCertificate);
    }

    let pfx = p12::PFX::parse(bytes)
        .map_err(|e| CertificateError::invalid_pkcs12(format!("{:?}", e)))?;

    let certs = pfx
        .cert_x509_bags(password)
        .map_err(|e| CertificateError::invalid_pkcs12(format!("certificate bags: {:?}", e)))?;
    if certs.is_empty() {
        return Err(CertificateError::EmptyCertificate);
    }

    let mut parsed = certs
        .into_iter()
        .map(|der| CertificateInfo::from_der(&der).map(|info| (der, info)))
        .collect::<Result<Vec<_>, _>>()?;

    let leaf_index = parsed.iter().position(|(_, info)| !info.is_ca).unwrap_or(0);
    let (leaf_der, info) = parsed.remove(leaf_index);

    let private_key = pfx
        .key_bags(password)
        .map_err(|e| CertificateError::invalid_pkcs12(format!("key bags: {:?}", e)))?
        .into_iter()
        .next()
        .map(|key| PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)));

    debug!(
        subject = %info.subject,
        chain_len = parsed.len(),
        has_key = private_key.is_some(),
        "Decoded PKCS#12 bundle"
    );

    Ok(DecodedCertificate {
        leaf: CertificateDer::from(leaf_der),
        chain: parsed.into_iter().map(|(der, _)| CertificateDer::from(der)).collect(),
        private_key,
        info,
    })
}
