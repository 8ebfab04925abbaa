/// mdfetch - fetch one URL through metadialer
///
/// Usage: mdfetch <URL>
///
/// Requests the URL over whichever network its address selects, verifying
/// TLS with the overlay-aware trust policy. The status line and headers go
/// to stderr, the decoded body to stdout.

use anyhow::{Context, Result};
use bytes::Bytes;
use hyper::header::{ACCEPT, USER_AGENT};
use hyper::Request;
use metadialer_core::{parse_target, MetaConnector, MetaHttpClient};
use metadialer_daemon::setup::{build_router, load_config, trust_policy};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only the body
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let url = std::env::args()
        .nth(1)
        .context("Missing URL. Usage: mdfetch <URL>")?;
    let target = parse_target(&url)?;

    let config = load_config()?;
    let router = Arc::new(build_router(&config).await);
    let connector = MetaConnector::new(router.clone(), trust_policy(&config)?)?;
    let client = MetaHttpClient::new(connector);

    info!(
        "Fetching {} via {} route",
        url,
        router.route(&target.authority())?
    );

    let uri = format!("{}://{}{}", target.scheme, target.authority(), target.path);
    let request = Request::get(uri)
        .header(USER_AGENT, concat!("mdfetch/", env!("CARGO_PKG_VERSION")))
        .header(ACCEPT, "*/*")
        .body(Bytes::new())?;

    let response = client
        .request(request)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    eprintln!("{:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        eprintln!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(response.body()).await?;
    stdout.flush().await?;

    Ok(())
}
