use super::stream::{BoxedStream, Dialer};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

/// Address families a direct stream dial may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    fn from_network(network: &str) -> io::Result<Self> {
        match network {
            "tcp" => Ok(Self::Any),
            "tcp4" => Ok(Self::V4),
            "tcp6" => Ok(Self::V6),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown network {}", other),
            )),
        }
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

/// Plain TCP dialer over the host's own network stack
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `address` and connect to the first candidate of the
    /// requested family that accepts, returning the last error otherwise.
    pub async fn connect(&self, network: &str, address: &str) -> io::Result<TcpStream> {
        let family = Family::from_network(network)?;

        let mut last_err = None;
        for candidate in tokio::net::lookup_host(address).await? {
            if !family.accepts(&candidate) {
                continue;
            }

            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    debug!("Direct: connected to {} ({})", address, candidate);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Direct: {} refused via {}: {}", address, candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no suitable address found for {} on {}", address, network),
            )
        }))
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        let stream = self.connect(network, address).await?;
        Ok(Box::new(stream))
    }
}
