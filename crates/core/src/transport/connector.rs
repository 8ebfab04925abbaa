use super::stream::BoxedStream;
use super::tls::{TrustError, TrustPolicy};
use crate::classify::{split_host_port, split_scheme};
use crate::router::{DialError, DialRouter};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::net::Ipv6Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// URL schemes the connector knows how to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// Connection target parsed from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path and query, at least `/`
    pub path: String,
}

impl Target {
    /// `host:port` as handed to the router, IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value of the `Host` header, without the port when it is the
    /// scheme default
    pub fn host_header(&self) -> String {
        let authority = self.authority();
        if self.port != self.scheme.default_port() {
            return authority;
        }
        match authority.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => authority,
        }
    }
}

/// Parse `url` into a connection target. A missing scheme means `http`.
pub fn parse_target(url: &str) -> Result<Target, ConnectError> {
    let invalid = |reason: &str| ConnectError::InvalidUrl(format!("{}: {}", url, reason));

    let (scheme, rest) = match split_scheme(url).map_err(invalid)? {
        Some((name, rest)) if name.eq_ignore_ascii_case("http") => (Scheme::Http, rest),
        Some((name, rest)) if name.eq_ignore_ascii_case("https") => (Scheme::Https, rest),
        Some((other, _)) => return Err(ConnectError::UnsupportedScheme(other.to_string())),
        None => (Scheme::Http, url),
    };

    let (authority, path) = match rest.find(['/', '?', '#']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let host_port = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };

    let (host, port) = split_host_port(host_port).map_err(invalid)?;
    if host.is_empty() {
        return Err(invalid("no hostname found"));
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("port out of range"))?,
        None => scheme.default_port(),
    };

    // Fragments never leave the client
    let path = path.split('#').next().unwrap_or_default();
    let path = match path {
        "" => "/".to_string(),
        p if p.starts_with('?') => format!("/{}", p),
        p => p.to_string(),
    };

    Ok(Target {
        scheme,
        host: host.to_string(),
        port,
        path,
    })
}

/// Opens URLs through the router, with TLS for `https`
#[derive(Clone)]
pub struct MetaConnector {
    router: Arc<DialRouter>,
    tls: TlsConnector,
}

impl MetaConnector {
    pub fn new(router: Arc<DialRouter>, policy: TrustPolicy) -> Result<Self, ConnectError> {
        let config = policy.client_config()?;

        Ok(Self {
            router,
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    pub fn router(&self) -> &Arc<DialRouter> {
        &self.router
    }

    /// Connect to the target of `url`
    pub async fn connect(&self, url: &str) -> Result<MetaStream, ConnectError> {
        let target = parse_target(url)?;
        self.connect_target(&target).await
    }

    pub async fn connect_target(&self, target: &Target) -> Result<MetaStream, ConnectError> {
        let stream = self.router.dial("tcp", &target.authority()).await?;

        match target.scheme {
            Scheme::Http => Ok(MetaStream::Plain(stream)),
            Scheme::Https => {
                let server_name = ServerName::try_from(target.host.clone())
                    .map_err(|_| ConnectError::InvalidServerName(target.host.clone()))?;

                debug!("TLS handshake with {}", target.host);
                let tls = self
                    .tls
                    .connect(server_name, stream)
                    .await
                    .map_err(ConnectError::Tls)?;

                Ok(MetaStream::Tls(Box::new(tls)))
            }
        }
    }
}

/// Stream returned by `MetaConnector`
pub enum MetaStream {
    Plain(BoxedStream),
    Tls(Box<TlsStream<BoxedStream>>),
}

impl MetaStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

macro_rules! forward_call {
    ($self:expr, $method:ident $(, $param:expr)*) => {
        match $self.get_mut() {
            MetaStream::Plain(stream) => Pin::new(stream).$method($($param),*),
            MetaStream::Tls(stream) => Pin::new(stream).$method($($param),*),
        }
    };
}

impl AsyncRead for MetaStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        forward_call!(self, poll_read, cx, buf)
    }
}

impl AsyncWrite for MetaStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        forward_call!(self, poll_write, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        forward_call!(self, poll_flush, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        forward_call!(self, poll_shutdown, cx)
    }
}

/// Connector errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    Tls(io::Error),

    #[error(transparent)]
    Trust(#[from] TrustError),
}
