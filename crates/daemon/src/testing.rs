//! Test doubles for the proxy and API tests.

use async_trait::async_trait;
use metadialer_core::{BoxedStream, DialRouter, Dialer, SessionHandle};
use std::io;
use std::sync::{Arc, Mutex};

/// Dialer whose every stream is served by an in-process echo task
#[derive(Default)]
pub(crate) struct EchoDialer {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl EchoDialer {
    pub fn new() -> (Self, Arc<Mutex<Vec<(String, String)>>>) {
        let dialer = Self::default();
        let calls = dialer.calls.clone();
        (dialer, calls)
    }
}

#[async_trait]
impl Dialer for EchoDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        self.calls
            .lock()
            .unwrap()
            .push((network.to_string(), address.to_string()));

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(&mut server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });

        Ok(Box::new(client))
    }

    fn session_id(&self) -> Option<&str> {
        Some("metadialer-echo")
    }
}

/// Anonymous router whose onion session echoes; garlic stays disabled
pub(crate) fn echo_router() -> (Arc<DialRouter>, Arc<Mutex<Vec<(String, String)>>>) {
    let (onion, calls) = EchoDialer::new();
    let router = DialRouter::builder()
        .onion(SessionHandle::ready(onion))
        .build();

    (Arc::new(router), calls)
}
