//! Test fixtures shared by the unit tests of this crate.

use crate::transport::{BoxedStream, Dialer};
use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;

pub(crate) struct TestCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

/// Self-signed leaf for `name`, optionally already expired
pub(crate) fn self_signed(name: &str, expired: bool) -> TestCert {
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    if expired {
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
    }

    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();

    TestCert {
        cert: cert.der().clone(),
        key: PrivateKeyDer::try_from(key.serialize_der()).unwrap(),
    }
}

/// Throwaway certificate authority
pub(crate) struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name).self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Subordinate authority signed by this one
    pub fn intermediate(&self, common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name)
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        Self { cert, key }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.der().clone()).unwrap();
        roots
    }

    /// Leaf for `name` signed by this authority
    pub fn issue(&self, name: &str) -> TestCert {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();

        TestCert {
            cert: cert.der().clone(),
            key: PrivateKeyDer::try_from(key.serialize_der()).unwrap(),
        }
    }
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

/// Dialer that records every call and hands out in-memory streams.
///
/// Streams queued with `push_stream` are returned first; afterwards each
/// call gets a fresh duplex whose peer end is dropped.
#[derive(Default)]
pub(crate) struct RecordingDialer {
    calls: Mutex<Vec<(String, String)>>,
    queued: Mutex<Vec<DuplexStream>>,
    fail_with: Option<io::ErrorKind>,
}

impl RecordingDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            fail_with: Some(kind),
            ..Self::default()
        }
    }

    pub fn push_stream(&self, stream: DuplexStream) {
        self.queued.lock().unwrap().push(stream);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        self.calls
            .lock()
            .unwrap()
            .push((network.to_string(), address.to_string()));

        if let Some(kind) = self.fail_with {
            return Err(io::Error::new(kind, "scripted failure"));
        }

        let stream = self.queued.lock().unwrap().pop();
        match stream {
            Some(stream) => Ok(Box::new(stream)),
            None => Ok(Box::new(tokio::io::duplex(64).0)),
        }
    }

    fn session_id(&self) -> Option<&str> {
        Some("metadialer-test")
    }
}

/// Forwards to a shared recorder so tests can inspect calls afterwards
pub(crate) struct Shared(pub Arc<RecordingDialer>);

#[async_trait]
impl Dialer for Shared {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        self.0.dial(network, address).await
    }

    fn session_id(&self) -> Option<&str> {
        self.0.session_id()
    }
}
