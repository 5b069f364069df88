use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::certificates::{CertificateInfo, DecodedCertificate};
use crate::errors::CertificateError;

/// A certificate with its private key, ready to bind to a listening port.
#[derive(Debug)]
pub struct ServingCertificate {
    certificate: DecodedCertificate,
    addr: SocketAddr,
}

impl ServingCertificate {
    /// Fails with `MissingPrivateKey` when the certificate has no key.
    pub fn new(certificate: DecodedCertificate, port: u16) -> Result<Self, CertificateError> {
        if !certificate.has_private_key() {
            let thumbprint = certificate.thumbprint();
            return Err(CertificateError::MissingPrivateKey { thumbprint });
        }
        Ok(Self { certificate, addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)) })
    }

    pub fn certificate(&self) -> &DecodedCertificate {
        &self.certificate
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.certificate.info
    }

    pub fn thumbprint(&self) -> String {
        self.certificate.thumbprint()
    }

    /// `0.0.0.0:<port>`
    pub fn listen_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// TLS server configuration: ring provider, safe protocol defaults, no
    /// client authentication, leaf plus chain presented.
    pub fn server_config(&self) -> Result<rustls::ServerConfig, CertificateError> {
        let key = self
            .certificate
            .private_key
            .as_ref()
            .ok_or_else(|| CertificateError::MissingPrivateKey { thumbprint: self.thumbprint() })?;

        let provider = rustls::crypto::ring::default_provider();
        let mut config = rustls::ServerConfig::builder_with_provider(provider.into())
            .with_safe_default_protocol_versions()
            .map_err(|source| CertificateError::TlsConfig { source })?
            .with_no_client_auth()
            .with_single_cert(self.certificate.full_chain(), key.clone_key())
            .map_err(|source| CertificateError::TlsConfig { source })?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }

    pub fn tls_acceptor(&self) -> Result<TlsAcceptor, CertificateError> {
        Ok(TlsAcceptor::from(Arc::new(self.server_config()?)))
    }
}
