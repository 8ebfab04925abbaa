/// HTTP proxy server in front of the dial router
///
/// Supports `CONNECT` tunnels (HTTPS) and plain absolute-form requests,
/// which are rewritten to origin form before being forwarded.

use anyhow::{anyhow, Result};
use metadialer_core::{parse_target, BoxedStream, DialError, DialRouter, Target};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Headers that only concern the client-to-proxy hop
const HOP_HEADERS: [&str; 4] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
];

/// Longest request or header line accepted, terminator included
const MAX_LINE_LEN: usize = 8 * 1024;

/// Most header fields accepted in one request
const MAX_HEADERS: usize = 100;

/// HTTP proxy server
pub struct HttpProxy {
    listen_addr: SocketAddr,
    router: Arc<DialRouter>,
}

impl HttpProxy {
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
        info!("HTTP proxy listening on {}", listener.local_addr()?);

        loop {
            let (socket, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("HTTP proxy: New connection from {}", addr);

            let router = self.router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, router, shutdown).await {
                    error!("HTTP proxy error: {}", e);
                }
            });
        }

        Ok(())
    }
}

/// Handle an HTTP proxy client connection
///
/// A plain request is forwarded with `Connection: close` and the
/// connection ends after its response, so every request on the client
/// connection goes through the router on its own.
async fn handle_client(
    stream: TcpStream,
    router: Arc<DialRouter>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let request_line = match read_line_limited(&mut reader).await {
        Ok(line) => line,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            send_error_response(&mut reader, 400, "Bad Request").await?;
            return Err(anyhow!("Rejected request line: {}", e));
        }
        Err(e) => return Err(e.into()),
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        send_error_response(&mut reader, 400, "Bad Request").await?;
        return Err(anyhow!("Invalid HTTP request line"));
    }
    let (method, uri, version) = (parts[0], parts[1], parts[2]);

    debug!("HTTP proxy: {} {}", method, uri);

    let headers = match read_headers(&mut reader).await {
        Ok(headers) => headers,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            send_error_response(&mut reader, 431, "Request Header Fields Too Large").await?;
            return Err(anyhow!("Rejected request headers: {}", e));
        }
        Err(e) => return Err(e.into()),
    };

    if method == "CONNECT" {
        let mut upstream = match dial(&mut reader, &router, &shutdown, uri).await? {
            Some(upstream) => upstream,
            None => return Ok(()),
        };

        reader
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
        super::relay(&mut reader, &mut upstream, uri).await;
        return Ok(());
    }

    let target = match parse_target(uri) {
        Ok(target) if uri.starts_with("http://") => target,
        _ => {
            send_error_response(&mut reader, 400, "Bad Request").await?;
            return Err(anyhow!("Proxy requests need an absolute http:// URI, got {}", uri));
        }
    };

    let body_len = match body_length(&headers) {
        Ok(len) => len,
        Err((code, message)) => {
            send_error_response(&mut reader, code, message).await?;
            return Err(anyhow!("Unforwardable request body for {}", uri));
        }
    };

    let authority = target.authority();
    let mut upstream = match dial(&mut reader, &router, &shutdown, &authority).await? {
        Some(upstream) => upstream,
        None => return Ok(()),
    };

    let head = origin_request(method, &target, version, &headers);
    upstream.write_all(head.as_bytes()).await?;
    tokio::io::copy(&mut (&mut reader).take(body_len), &mut upstream).await?;
    upstream.flush().await?;

    // Anything the client pipelined after this request stays unread
    match tokio::io::copy(&mut upstream, &mut reader).await {
        Ok(received) => debug!("HTTP proxy: {} answered with {} bytes", authority, received),
        Err(e) => debug!("HTTP proxy: Response from {} ended: {}", authority, e),
    }
    reader.shutdown().await?;
    Ok(())
}

/// Dial `target`, answering the client with an error status on failure
async fn dial<W>(
    client: &mut W,
    router: &DialRouter,
    shutdown: &CancellationToken,
    target: &str,
) -> Result<Option<BoxedStream>>
where
    W: AsyncWrite + Unpin,
{
    match router.dial_with_cancel(shutdown, "tcp", target).await {
        Ok(upstream) => Ok(Some(upstream)),
        Err(e) => {
            warn!("HTTP proxy: Failed to connect to {}: {}", target, e);
            let (code, message) = status_for(&e);
            send_error_response(client, code, message).await?;
            Ok(None)
        }
    }
}

/// Read one line of the request head, refusing lines over `MAX_LINE_LEN`
async fn read_line_limited<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_line(&mut line)
        .await?;

    if n == MAX_LINE_LEN && !line.ends_with('\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "header line too long"));
    }
    Ok(line)
}

async fn read_headers<R>(reader: &mut R) -> io::Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    loop {
        let line = read_line_limited(reader).await?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "too many header fields"));
        }
        headers.push(line);
    }
    Ok(headers)
}

fn header_name(header: &str) -> String {
    header
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Length of the request body, or the status to refuse it with.
/// Chunked uploads are refused since the body is copied by length.
fn body_length(headers: &[String]) -> Result<u64, (u16, &'static str)> {
    let mut length = 0;
    for header in headers {
        let name = header_name(header);
        if name == "transfer-encoding" {
            return Err((411, "Length Required"));
        }
        if name == "content-length" {
            let value = header.split_once(':').map(|(_, v)| v.trim()).unwrap_or_default();
            length = value.parse().map_err(|_| (400, "Bad Request"))?;
        }
    }
    Ok(length)
}

/// Request head in origin form, without hop-by-hop headers
fn origin_request(method: &str, target: &Target, version: &str, headers: &[String]) -> String {
    let mut head = format!("{} {} {}\r\n", method, target.path, version);

    let mut has_host = false;
    for header in headers {
        let name = header_name(header);
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        has_host |= name == "host";
        head.push_str(header.trim_end());
        head.push_str("\r\n");
    }

    if !has_host {
        head.push_str(&format!("Host: {}\r\n", target.host_header()));
    }
    head.push_str("Connection: close\r\n\r\n");
    head
}

/// HTTP status for a failed dial
fn status_for(err: &DialError) -> (u16, &'static str) {
    match err {
        DialError::InvalidAddress(_) | DialError::UnsupportedNetwork { .. } => (400, "Bad Request"),
        DialError::ProviderUnavailable { .. } | DialError::Cancelled => {
            (503, "Service Unavailable")
        }
        DialError::Io(_) => (502, "Bad Gateway"),
    }
}

/// Send an HTTP error response
async fn send_error_response<W>(stream: &mut W, code: u16, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        code, message
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
