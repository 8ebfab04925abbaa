/// SOCKS5-backed overlay session
///
/// Both overlay routers expose a local SOCKS5 port (Tor's `SocksPort`, the
/// I2P SOCKS tunnel). Streams are opened through it with `CONNECT`, leaving
/// name resolution to the overlay. The session identifier is offered as
/// username/password so Tor's `IsolateSOCKSAuth` keeps each instance on its
/// own circuits.

use super::{generate_session_id, SessionError};
use crate::classify::split_host_port;
use crate::transport::{BoxedStream, Dialer};
use async_trait::async_trait;
use metadialer_common::{Overlay, SessionConfig};
use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// SOCKS5 wire constants
pub mod consts {
    pub const SOCKS_VERSION: u8 = 0x05;
    pub const NO_AUTH_REQUIRED: u8 = 0x00;
    pub const USERNAME_PASSWORD: u8 = 0x02;
    pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;
    pub const USERPASS_VERSION: u8 = 0x01;
    pub const CONNECT_COMMAND: u8 = 0x01;
    pub const RESERVED: u8 = 0x00;

    pub const IPV4_ADDRESS: u8 = 0x01;
    pub const DOMAIN_NAME: u8 = 0x03;
    pub const IPV6_ADDRESS: u8 = 0x04;

    pub const SUCCESS: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const CONNECTION_NOT_ALLOWED: u8 = 0x02;
    pub const NETWORK_UNREACHABLE: u8 = 0x03;
    pub const HOST_UNREACHABLE: u8 = 0x04;
    pub const CONNECTION_REFUSED: u8 = 0x05;
    pub const TTL_EXPIRED: u8 = 0x06;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

use consts::*;

/// Networks a SOCKS `CONNECT` can carry
const STREAM_NETWORKS: [&str; 5] = ["tcp", "tcp4", "tcp6", "onion", "i2p"];

/// Session with one overlay router's SOCKS5 endpoint
#[derive(Debug, Clone)]
pub struct SocksSession {
    overlay: Overlay,
    endpoint: String,
    session_id: String,
}

impl SocksSession {
    /// Open the session: make sure the configured endpoint speaks SOCKS5
    pub async fn connect(overlay: Overlay, config: &SessionConfig) -> Result<Self, SessionError> {
        if !config.enabled {
            return Err(SessionError::Disabled(overlay));
        }

        let session = Self {
            overlay,
            endpoint: config.endpoint(overlay).to_string(),
            session_id: generate_session_id(),
        };

        tokio::time::timeout(config.init_timeout(), session.probe())
            .await
            .map_err(|_| SessionError::Timeout {
                overlay,
                endpoint: session.endpoint.clone(),
                secs: config.init_timeout_secs,
            })??;

        info!(
            "{} session {} ready via {}",
            overlay, session.session_id, session.endpoint
        );

        Ok(session)
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run method negotiation once and hang up
    async fn probe(&self) -> Result<(), SessionError> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| SessionError::Unreachable {
                overlay: self.overlay,
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        select_method(&mut stream)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Handshake {
                overlay: self.overlay,
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })
    }

    async fn authenticate(&self, stream: &mut TcpStream) -> io::Result<()> {
        match select_method(stream).await? {
            NO_AUTH_REQUIRED => Ok(()),
            USERNAME_PASSWORD => {
                // Same value for both fields; only the pair matters for isolation
                let credential = self.session_id.as_bytes();
                let mut request = Vec::with_capacity(3 + 2 * credential.len());
                request.push(USERPASS_VERSION);
                request.push(credential.len() as u8);
                request.extend_from_slice(credential);
                request.push(credential.len() as u8);
                request.extend_from_slice(credential);
                stream.write_all(&request).await?;

                let mut reply = [0u8; 2];
                stream.read_exact(&mut reply).await?;
                if reply[1] != SUCCESS {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "SOCKS5 username/password authentication failed",
                    ));
                }
                Ok(())
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("SOCKS5 server chose unsupported method {:#04x}", other),
            )),
        }
    }
}

#[async_trait]
impl Dialer for SocksSession {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        if !STREAM_NETWORKS.contains(&network) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} session carries streams only, not {}", self.overlay, network),
            ));
        }

        let (host, port) = split_host_port(address)
            .map_err(|reason| io::Error::new(io::ErrorKind::InvalidInput, reason))?;
        let port = port
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("missing or invalid port in {}", address),
                )
            })?;

        debug!(
            "{} session {}: CONNECT {} via {}",
            self.overlay, self.session_id, address, self.endpoint
        );

        let mut stream = TcpStream::connect(&self.endpoint).await?;
        self.authenticate(&mut stream).await?;
        request_connect(&mut stream, host, port).await?;

        Ok(Box::new(stream))
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// Offer no-auth and username/password; return the server's choice
async fn select_method(stream: &mut TcpStream) -> io::Result<u8> {
    stream
        .write_all(&[SOCKS_VERSION, 2, NO_AUTH_REQUIRED, USERNAME_PASSWORD])
        .await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    if reply[0] != SOCKS_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported SOCKS version: {}", reply[0]),
        ));
    }

    if reply[1] == NO_ACCEPTABLE_METHODS {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "No acceptable auth methods",
        ));
    }

    Ok(reply[1])
}

/// Send `CONNECT host:port` and consume the reply
async fn request_connect(stream: &mut TcpStream, host: &str, port: u16) -> io::Result<()> {
    let mut request = vec![SOCKS_VERSION, CONNECT_COMMAND, RESERVED];

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(IPV4_ADDRESS);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(IPV6_ADDRESS);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "hostname longer than 255 bytes")
            })?;
            request.push(DOMAIN_NAME);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    // VER | REP | RSV | ATYP
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid SOCKS version in reply",
        ));
    }

    if header[1] != SUCCESS {
        return Err(reply_error(header[1]));
    }

    // BND.ADDR | BND.PORT, unused
    let addr_len = match header[3] {
        IPV4_ADDRESS => 4,
        IPV6_ADDRESS => 16,
        DOMAIN_NAME => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported address type in reply: {}", other),
            ))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

fn reply_error(code: u8) -> io::Error {
    let (kind, message) = match code {
        GENERAL_FAILURE => (io::ErrorKind::Other, "general SOCKS server failure"),
        CONNECTION_NOT_ALLOWED => (io::ErrorKind::PermissionDenied, "connection not allowed by ruleset"),
        NETWORK_UNREACHABLE => (io::ErrorKind::Other, "network unreachable"),
        HOST_UNREACHABLE => (io::ErrorKind::Other, "host unreachable"),
        CONNECTION_REFUSED => (io::ErrorKind::ConnectionRefused, "connection refused"),
        TTL_EXPIRED => (io::ErrorKind::TimedOut, "TTL expired"),
        COMMAND_NOT_SUPPORTED => (io::ErrorKind::Unsupported, "command not supported"),
        ADDRESS_TYPE_NOT_SUPPORTED => (io::ErrorKind::Unsupported, "address type not supported"),
        _ => (io::ErrorKind::Other, "unknown SOCKS reply"),
    };

    io::Error::new(kind, format!("SOCKS5 reply {:#04x}: {}", code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal SOCKS5 server: answers the startup probe, then serves one
    /// CONNECT with `reply` and echoes what follows.
    async fn scripted_server(method: u8, reply: u8) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            // Probe connection
            let (mut probe, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 4];
            probe.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [SOCKS_VERSION, 2, NO_AUTH_REQUIRED, USERNAME_PASSWORD]);
            probe.write_all(&[SOCKS_VERSION, method]).await.unwrap();
            drop(probe);

            // Dial connection
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.read_exact(&mut greeting).await.unwrap();
            conn.write_all(&[SOCKS_VERSION, method]).await.unwrap();

            let mut username = Vec::new();
            if method == USERNAME_PASSWORD {
                let mut head = [0u8; 2];
                conn.read_exact(&mut head).await.unwrap();
                assert_eq!(head[0], USERPASS_VERSION);
                username = vec![0u8; head[1] as usize];
                conn.read_exact(&mut username).await.unwrap();
                let mut plen = [0u8; 1];
                conn.read_exact(&mut plen).await.unwrap();
                let mut password = vec![0u8; plen[0] as usize];
                conn.read_exact(&mut password).await.unwrap();
                assert_eq!(password, username);
                conn.write_all(&[USERPASS_VERSION, SUCCESS]).await.unwrap();
            }

            let mut header = [0u8; 5];
            conn.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..4], &[SOCKS_VERSION, CONNECT_COMMAND, RESERVED, DOMAIN_NAME]);
            let mut target = vec![0u8; header[4] as usize + 2];
            conn.read_exact(&mut target).await.unwrap();

            conn.write_all(&[SOCKS_VERSION, reply, RESERVED, IPV4_ADDRESS, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            if reply == SUCCESS {
                let mut buf = [0u8; 4];
                conn.read_exact(&mut buf).await.unwrap();
                conn.write_all(&buf).await.unwrap();
            }

            let mut seen = username;
            seen.push(b'|');
            seen.extend_from_slice(&target);
            seen
        });

        (addr, task)
    }

    fn config(addr: &str) -> SessionConfig {
        SessionConfig::for_overlay(Overlay::Onion).with_socks_addr(addr)
    }

    #[tokio::test]
    async fn test_connect_with_session_credentials() {
        let (addr, server) = scripted_server(USERNAME_PASSWORD, SUCCESS).await;

        let session = SocksSession::connect(Overlay::Onion, &config(&addr)).await.unwrap();
        let mut stream = session.dial("onion", "abcdef.onion:80").await.unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let seen = server.await.unwrap();
        let mut expected = session.session_id().unwrap().as_bytes().to_vec();
        expected.push(b'|');
        expected.extend_from_slice(b"abcdef.onion");
        expected.extend_from_slice(&80u16.to_be_bytes());
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_connect_without_auth() {
        let (addr, server) = scripted_server(NO_AUTH_REQUIRED, SUCCESS).await;

        let session = SocksSession::connect(Overlay::Garlic, &config(&addr)).await.unwrap();
        assert_eq!(session.overlay(), Overlay::Garlic);
        let mut stream = session.dial("tcp", "example.i2p:443").await.unwrap();

        stream.write_all(b"i2p!").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"i2p!");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_reply() {
        let (addr, server) = scripted_server(NO_AUTH_REQUIRED, CONNECTION_REFUSED).await;

        let session = SocksSession::connect(Overlay::Onion, &config(&addr)).await.unwrap();
        let err = session.dial("onion", "gone.onion:80").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = SocksSession::connect(Overlay::Onion, &config(&addr)).await.unwrap_err();
        assert!(matches!(err, SessionError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_rejecting_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 4];
            conn.read_exact(&mut greeting).await.unwrap();
            conn.write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHODS]).await.unwrap();
        });

        let err = SocksSession::connect(Overlay::Garlic, &config(&addr)).await.unwrap_err();
        assert!(matches!(err, SessionError::Handshake { .. }));
    }

    #[tokio::test]
    async fn test_disabled_session() {
        let err = SocksSession::connect(Overlay::Garlic, &config("127.0.0.1:1").disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Disabled(Overlay::Garlic)));
    }

    #[tokio::test]
    async fn test_rejects_datagram_networks() {
        let session = SocksSession {
            overlay: Overlay::Onion,
            endpoint: "127.0.0.1:1".to_string(),
            session_id: generate_session_id(),
        };

        let err = session.dial("udp", "x.onion:53").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = session.dial("tcp", "x.onion").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
