/// SOCKS5 proxy server in front of the dial router
///
/// Accepts `CONNECT` requests and hands the target to the router, which
/// picks I2P, Tor or a direct connection from the address.

use anyhow::{anyhow, Result};
use metadialer_core::session::socks::consts::*;
use metadialer_core::{DialError, DialRouter};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// SOCKS5 proxy server
pub struct Socks5Server {
    listen_addr: SocketAddr,
    router: Arc<DialRouter>,
}

impl Socks5Server {
    pub fn new(listen_addr: SocketAddr, router: Arc<DialRouter>) -> Self {
        Self {
            listen_addr,
            router,
        }
    }

    /// Bind and serve until `shutdown` fires
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("SOCKS5 proxy listening on {}", listener.local_addr()?);

        loop {
            let (socket, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("SOCKS5: New connection from {}", addr);

            let router = self.router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, router, shutdown).await {
                    error!("SOCKS5 error: {}", e);
                }
            });
        }

        Ok(())
    }
}

/// Handle a SOCKS5 client connection
async fn handle_client(
    mut stream: TcpStream,
    router: Arc<DialRouter>,
    shutdown: CancellationToken,
) -> Result<()> {
    // 1. Handshake
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS_VERSION {
        return Err(anyhow!("Unsupported SOCKS version: {}", buf[0]));
    }

    let n_methods = buf[1] as usize;
    let mut methods = vec![0u8; n_methods];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&NO_AUTH_REQUIRED) {
        stream.write_all(&[SOCKS_VERSION, NO_AUTH_REQUIRED]).await?;
    } else if methods.contains(&USERNAME_PASSWORD) {
        // Credentials are accepted as given; they only matter upstream
        stream.write_all(&[SOCKS_VERSION, USERNAME_PASSWORD]).await?;
        skip_credentials(&mut stream).await?;
        stream.write_all(&[USERPASS_VERSION, SUCCESS]).await?;
    } else {
        stream.write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHODS]).await?;
        return Err(anyhow!("No acceptable auth methods"));
    }

    // 2. Request
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;

    if request[0] != SOCKS_VERSION {
        return Err(anyhow!("Invalid SOCKS version in request"));
    }

    let command = request[1];
    let address_type = request[3];

    if command != CONNECT_COMMAND {
        send_reply(&mut stream, COMMAND_NOT_SUPPORTED).await?;
        return Err(anyhow!("Unsupported command: {}", command));
    }

    let target = match address_type {
        IPV4_ADDRESS => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            format!("{}:{}", Ipv4Addr::from(addr), read_port(&mut stream).await?)
        }
        DOMAIN_NAME => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            format!(
                "{}:{}",
                String::from_utf8_lossy(&domain),
                read_port(&mut stream).await?
            )
        }
        IPV6_ADDRESS => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            format!("[{}]:{}", Ipv6Addr::from(addr), read_port(&mut stream).await?)
        }
        _ => {
            send_reply(&mut stream, ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(anyhow!("Unsupported address type: {}", address_type));
        }
    };

    debug!("SOCKS5: Request to connect to {}", target);

    let mut upstream = match router.dial_with_cancel(&shutdown, "tcp", &target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("SOCKS5: Failed to connect to {}: {}", target, e);
            send_reply(&mut stream, reply_code(&e)).await?;
            return Err(e.into());
        }
    };

    send_reply(&mut stream, SUCCESS).await?;

    super::relay(&mut stream, &mut upstream, &target).await;
    Ok(())
}

async fn read_port(stream: &mut TcpStream) -> io::Result<u16> {
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Consume an RFC 1929 sub-negotiation request
async fn skip_credentials(stream: &mut TcpStream) -> Result<()> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != USERPASS_VERSION {
        return Err(anyhow!("Unsupported auth version: {}", head[0]));
    }

    let mut username = vec![0u8; head[1] as usize];
    stream.read_exact(&mut username).await?;

    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut password = vec![0u8; len[0] as usize];
    stream.read_exact(&mut password).await?;

    Ok(())
}

/// SOCKS5 reply code for a failed dial
fn reply_code(err: &DialError) -> u8 {
    match err {
        DialError::InvalidAddress(_) => HOST_UNREACHABLE,
        DialError::ProviderUnavailable { .. } => NETWORK_UNREACHABLE,
        DialError::UnsupportedNetwork { .. } => CONNECTION_NOT_ALLOWED,
        DialError::Cancelled => GENERAL_FAILURE,
        DialError::Io(e) => match e.kind() {
            io::ErrorKind::ConnectionRefused => CONNECTION_REFUSED,
            io::ErrorKind::PermissionDenied => CONNECTION_NOT_ALLOWED,
            io::ErrorKind::TimedOut => TTL_EXPIRED,
            _ => HOST_UNREACHABLE,
        },
    }
}

/// Send a SOCKS5 reply to the client
async fn send_reply(stream: &mut TcpStream, reply_code: u8) -> Result<()> {
    // Reply format: VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
    let reply = [
        SOCKS_VERSION,
        reply_code,
        RESERVED,
        IPV4_ADDRESS,
        0, 0, 0, 0, // Bind address (0.0.0.0)
        0, 0, // Bind port (0)
    ];

    stream.write_all(&reply).await?;
    Ok(())
}
