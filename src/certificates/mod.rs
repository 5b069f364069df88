//! Certificate decoding.
//!
//! [`decode`] turns a fetched [`crate::secrets::SecretPayload`] into a
//! [`DecodedCertificate`], dispatching strictly on the declared content type:
//!
//! | Content type | Raw value | Result |
//! |---|---|---|
//! | `application/x-pkcs12` | base64 PKCS#12 (empty password) | certificate, chain and key |
//! | `application/pkix-cert` | JSON `{"Data": ...}` around DER | certificate only |
//! | anything else | not interpreted | `Ok(None)` |

pub mod decode;
pub mod model;

pub use decode::{decode, decode_der, decode_pkcs12, PKCS12_EXPORT_PASSWORD};
pub use model::{thumbprint, to_pem, CertificateInfo, CertificatePayload, DecodedCertificate};
