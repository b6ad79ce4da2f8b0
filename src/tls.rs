//! TLS client configurations
//!
use std::sync::Arc;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
  client::danger::HandshakeSignatureValid, client::danger::ServerCertVerified,
  client::danger::ServerCertVerifier, ClientConfig, DigitallySignedStruct, Error as TLSError,
  RootCertStore, SignatureScheme,
};

use crate::errors::Result;

/// Client configurations for both answers to a server trust challenge.
#[derive(Clone)]
pub(crate) struct TlsConfigs {
  verified: Arc<ClientConfig>,
  trusting: Arc<ClientConfig>,
}

impl std::fmt::Debug for TlsConfigs {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("TlsConfigs(..)")
  }
}

impl TlsConfigs {
  pub(crate) fn new() -> Result<Self> {
    let provider = rustls::crypto::CryptoProvider::get_default()
      .cloned()
      .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in native.errors {
      tracing::debug!("native certificate skipped: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("loaded {} native roots, ignored {}", added, ignored);
    let verified = ClientConfig::builder_with_provider(provider.clone())
      .with_safe_default_protocol_versions()
      .map_err(crate::errors::builder)?
      .with_root_certificates(roots)
      .with_no_client_auth();
    let trusting = ClientConfig::builder_with_provider(provider)
      .with_safe_default_protocol_versions()
      .map_err(crate::errors::builder)?
      .dangerous()
      .with_custom_certificate_verifier(Arc::new(NoVerifier))
      .with_no_client_auth();
    Ok(TlsConfigs {
      verified: Arc::new(verified),
      trusting: Arc::new(trusting),
    })
  }
  /// The configuration to use, given whether the server is trusted outright.
  pub(crate) fn select(&self, trust: bool) -> Arc<ClientConfig> {
    if trust {
      self.trusting.clone()
    } else {
      self.verified.clone()
    }
  }
}

#[derive(Debug)]
pub(crate) struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer,
    _intermediates: &[CertificateDer],
    _server_name: &ServerName,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> std::result::Result<ServerCertVerified, TLSError> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    rustls::crypto::ring::default_provider()
      .signature_verification_algorithms
      .supported_schemes()
  }
}
