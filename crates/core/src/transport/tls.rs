/// TLS trust policy
///
/// Certificates presented by `.onion` and `.i2p` endpoints are not checked
/// against any certificate authority: the overlay address already
/// authenticates the peer. Every other server name goes through regular
/// WebPKI chain and hostname verification.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_native_certs::CertificateResult;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Server name suffixes whose certificates are accepted without PKI checks
pub const OVERLAY_SUFFIXES: [&str; 2] = [".onion", ".i2p"];

/// Certificate verifier applying the overlay-aware trust policy
#[derive(Debug)]
pub struct TrustPolicy {
    /// Verifier used for clearnet names
    webpki: Arc<WebPkiServerVerifier>,

    provider: Arc<CryptoProvider>,
}

impl TrustPolicy {
    /// Build the policy over `roots`, or over the platform store when `None`
    pub fn new(roots: Option<RootCertStore>) -> Result<Self, TrustError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = roots.unwrap_or_else(platform_roots);

        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| TrustError::Config(e.to_string()))?;

        Ok(Self { webpki, provider })
    }

    /// Build the policy over the roots in a PEM bundle
    pub fn from_pem_file(path: &Path) -> Result<Self, TrustError> {
        Self::new(Some(load_roots_pem(path)?))
    }

    /// Whether certificate checks are skipped for `name`.
    ///
    /// Matching is exact and case-sensitive: `FOO.ONION` is verified like any
    /// clearnet name. Callers wanting case-insensitive behavior must
    /// normalize the name before the handshake.
    pub fn is_overlay_name(name: &str) -> bool {
        OVERLAY_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    }

    /// Evaluate a peer chain (leaf first) for `server_name`
    pub fn verify_chain(
        &self,
        server_name: &ServerName<'_>,
        chain: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), TrustError> {
        match chain.split_first() {
            Some((end_entity, intermediates)) => {
                self.check(server_name, Some(end_entity), intermediates, &[], now)
            }
            None => self.check(server_name, None, &[], &[], now),
        }
    }

    fn check(
        &self,
        server_name: &ServerName<'_>,
        end_entity: Option<&CertificateDer<'_>>,
        intermediates: &[CertificateDer<'_>],
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<(), TrustError> {
        if let ServerName::DnsName(name) = server_name {
            if Self::is_overlay_name(name.as_ref()) {
                debug!("TLS: skipping certificate verification for {}", name.as_ref());
                return Ok(());
            }
        }

        let end_entity = end_entity.ok_or(TrustError::NoPeerCertificates)?;

        self.webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map(|_| ())
            .map_err(TrustError::VerificationFailure)
    }

    /// Client configuration with this policy as its only certificate gate
    pub fn client_config(self) -> Result<ClientConfig, TrustError> {
        let provider = self.provider.clone();

        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustError::Config(format!("Failed to set protocol versions: {:?}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth();

        Ok(config)
    }
}

impl ServerCertVerifier for TrustPolicy {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check(server_name, Some(end_entity), intermediates, ocsp_response, now)
            .map(|_| ServerCertVerified::assertion())
            .map_err(rustls::Error::from)
    }

    // Handshake signatures are always checked against the presented key,
    // overlay names included.
    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

/// Mozilla's root bundle plus whatever the operating system trusts
pub fn platform_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
    for error in errors {
        warn!("failed to load cert (native), error: {}", error);
    }

    for cert in certs {
        if let Err(err) = store.add(cert) {
            warn!("failed to add cert (native), error: {}", err);
        }
    }

    store
}

/// Load every certificate in a PEM bundle as a trust anchor
pub fn load_roots_pem(path: &Path) -> Result<RootCertStore, TrustError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| TrustError::RootStore(format!("{}: {}", path.display(), e)))?;

    let mut store = RootCertStore::empty();
    for cert in certs {
        let cert = cert.map_err(|e| TrustError::RootStore(format!("{}: {}", path.display(), e)))?;
        store
            .add(cert)
            .map_err(|e| TrustError::RootStore(format!("{}: {}", path.display(), e)))?;
    }

    if store.is_empty() {
        return Err(TrustError::RootStore(format!(
            "{}: no certificates found",
            path.display()
        )));
    }

    Ok(store)
}

/// Trust policy errors
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("no peer certificates provided")]
    NoPeerCertificates,

    #[error("certificate verification failed: {0}")]
    VerificationFailure(rustls::Error),

    #[error("Failed to load root certificates: {0}")]
    RootStore(String),

    #[error("Failed to create config: {0}")]
    Config(String),
}

impl From<TrustError> for rustls::Error {
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::NoPeerCertificates => rustls::Error::NoCertificatesPresented,
            TrustError::VerificationFailure(e) => e,
            other => rustls::Error::General(other.to_string()),
        }
    }
}
