//! TLS trust settings for https ingestion endpoints.
//!
use std::io::{BufRead, BufReader, Cursor};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
  client::danger::HandshakeSignatureValid, client::danger::ServerCertVerified,
  client::danger::ServerCertVerifier, DigitallySignedStruct, Error as TLSError, RootCertStore,
  SignatureScheme,
};

/// A trusted root certificate for the ingestion backend.
#[derive(Clone, Debug)]
pub struct Certificate {
  der: Vec<u8>,
}

impl Certificate {
  /// Create a `Certificate` from a binary DER encoded certificate.
  pub fn from_der(der: &[u8]) -> crate::Result<Certificate> {
    Ok(Certificate { der: der.to_owned() })
  }

  /// Reads every certificate of a PEM bundle such as a lab CA `.crt` file.
  ///
  /// ```
  /// let certs = pagetap::Certificate::from_pem_bundle(b"").unwrap();
  /// assert!(certs.is_empty());
  /// ```
  pub fn from_pem_bundle(pem_bundle: &[u8]) -> crate::Result<Vec<Certificate>> {
    let mut reader = BufReader::new(Cursor::new(pem_bundle));
    read_pem_certs(&mut reader)?
      .into_iter()
      .map(|der| Ok(Certificate { der }))
      .collect()
  }

  pub(crate) fn add_to(self, roots: &mut RootCertStore) -> crate::Result<()> {
    roots
      .add(CertificateDer::from(self.der))
      .map_err(crate::errors::builder)
  }
}

fn read_pem_certs(reader: &mut impl BufRead) -> crate::Result<Vec<Vec<u8>>> {
  rustls_pemfile::certs(reader)
    .map(|result| match result {
      Ok(cert) => Ok(cert.as_ref().to_vec()),
      Err(_) => Err(crate::errors::builder("invalid certificate encoding")),
    })
    .collect()
}

/// Accepts any server certificate; for self-signed lab backends only.
#[derive(Debug)]
pub(crate) struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer,
    _intermediates: &[CertificateDer],
    _server_name: &ServerName,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, TLSError> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    vec![
      SignatureScheme::RSA_PKCS1_SHA256,
      SignatureScheme::ECDSA_NISTP256_SHA256,
      SignatureScheme::RSA_PKCS1_SHA384,
      SignatureScheme::ECDSA_NISTP384_SHA384,
      SignatureScheme::RSA_PKCS1_SHA512,
      SignatureScheme::RSA_PSS_SHA256,
      SignatureScheme::RSA_PSS_SHA384,
      SignatureScheme::RSA_PSS_SHA512,
      SignatureScheme::ED25519,
    ]
  }
}
