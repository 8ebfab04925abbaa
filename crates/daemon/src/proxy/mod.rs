/// Proxy front ends for the dial router
///
/// This module provides SOCKS5 and HTTP proxy servers so that ordinary
/// applications can have their connections routed by metadialer.

mod http;
mod socks5;

pub use http::HttpProxy;
pub use socks5::Socks5Server;

use anyhow::Result;
use metadialer_core::DialRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Proxy manager that runs both SOCKS5 and HTTP proxies
pub struct ProxyManager {
    socks5_addr: SocketAddr,
    http_addr: SocketAddr,
    router: Arc<DialRouter>,
}

impl ProxyManager {
    pub fn new(socks5_addr: SocketAddr, http_addr: SocketAddr, router: Arc<DialRouter>) -> Self {
        Self {
            socks5_addr,
            http_addr,
            router,
        }
    }

    /// Run both proxies until one fails or `shutdown` fires
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting proxy services...");

        let socks5 = Socks5Server::new(self.socks5_addr, self.router.clone());
        let http = HttpProxy::new(self.http_addr, self.router.clone());

        tokio::select! {
            result = socks5.start(shutdown.clone()) => {
                result?;
            }
            result = http.start(shutdown.clone()) => {
                result?;
            }
        }

        info!("Proxy services stopped");
        Ok(())
    }
}

/// Copy bytes both ways until either side closes
pub(crate) async fn relay<A, B>(client: &mut A, upstream: &mut B, target: &str)
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    match tokio::io::copy_bidirectional(client, upstream).await {
        Ok((sent, received)) => {
            debug!("Relay to {} closed ({} bytes up, {} bytes down)", target, sent, received)
        }
        Err(e) => debug!("Relay to {} ended: {}", target, e),
    }
}
