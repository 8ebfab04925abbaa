use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bidirectional byte stream returned by every dial path
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased connection
pub type BoxedStream = Box<dyn AsyncStream>;

/// Capability to open a connection to `address` over `network`.
///
/// `network` uses the usual names (`tcp`, `tcp4`, `tcp6`, ...); overlay
/// sessions additionally understand their own pseudo networks such as
/// `onion`. Errors come straight from the underlying transport.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream>;

    /// Identifier of the overlay session behind this dialer, if any
    fn session_id(&self) -> Option<&str> {
        None
    }
}
