/// metadialer daemon
///
/// Routes connections by destination:
/// - `.i2p` addresses through the local I2P router
/// - `.onion` addresses through the local Tor client
/// - Everything else through a Tor exit, or directly when anonymity is off
///
/// and offers that routing to other programs over SOCKS5 and HTTP proxies.

use anyhow::{Context, Result};
use metadialer_core::{top_level_label, DialRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use metadialer_common::{DialerConfig, Overlay};
use metadialer_daemon::setup::{build_router, load_config};
use metadialer_daemon::{ApiServer, ProxyManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("help" | "--help" | "-h") => print_help(),
        Some("version" | "--version" | "-v") => {
            println!("metadialer v{}", env!("CARGO_PKG_VERSION"));
        }
        Some("route") => match args.get(2) {
            Some(address) => print_route(address)?,
            None => {
                eprintln!("Usage: metadialer-daemon route <ADDRESS>");
                std::process::exit(1);
            }
        },
        Some("proxy") | None => run_proxy_mode().await?,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Run the SOCKS5 and HTTP proxies plus the status API
async fn run_proxy_mode() -> Result<()> {
    info!("Starting metadialer v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let router = Arc::new(build_router(&config).await);
    print_status(&config, &router);

    let socks5_addr: SocketAddr = config
        .proxy
        .socks5_addr
        .parse()
        .context("Invalid SOCKS5 listen address")?;
    let http_addr: SocketAddr = config
        .proxy
        .http_addr
        .parse()
        .context("Invalid HTTP listen address")?;
    let api_addr: SocketAddr = config
        .proxy
        .api_addr
        .parse()
        .context("Invalid API listen address")?;

    let shutdown = CancellationToken::new();

    // Start API server in background
    let api_server = ApiServer::new(api_addr, router.clone());
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = api_server.start(api_shutdown).await {
            warn!("API server error: {}", e);
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_shutdown.cancel();
    });

    let proxy_manager = ProxyManager::new(socks5_addr, http_addr, router);
    let result = proxy_manager.start(shutdown.clone()).await;
    shutdown.cancel();

    result
}

/// Print the routing decision for one address without dialing
fn print_route(address: &str) -> Result<()> {
    let config = load_config()?;
    let router = DialRouter::builder().anonymous(config.anonymous).build();

    let label = top_level_label(address)?;
    let route = router.route(address)?;

    println!("address:   {}", address);
    println!("label:     {}", label);
    println!("route:     {}", route);
    println!("anonymous: {}", route.is_anonymous());
    Ok(())
}

fn print_status(config: &DialerConfig, router: &DialRouter) {
    println!("\n========================================");
    println!("         metadialer status");
    println!("========================================");
    println!("Anonymous:   {}", router.anonymous());
    for overlay in [Overlay::Garlic, Overlay::Onion] {
        let handle = router.session(overlay);
        let endpoint = config.session(overlay).endpoint(overlay);
        match handle.session_id() {
            Some(id) => println!("{:<12} ready via {} ({})", format!("{}:", overlay), endpoint, id),
            None => println!("{:<12} unavailable", format!("{}:", overlay)),
        }
    }
    println!("SOCKS5:      {}", config.proxy.socks5_addr);
    println!("HTTP:        {}", config.proxy.http_addr);
    println!("API:         {}", config.proxy.api_addr);
    println!("========================================\n");
}

/// Print help message
fn print_help() {
    println!("metadialer - route connections over I2P, Tor or the clearnet");
    println!();
    println!("USAGE:");
    println!("    metadialer-daemon [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    proxy             Run SOCKS5 and HTTP proxy services (default)");
    println!("    route <ADDRESS>   Show which backend an address would use");
    println!("    help              Show this help message");
    println!("    version           Show version information");
    println!();
    println!("CONFIGURATION:");
    println!("    metadialer.toml, or the file named by METADIALER_CONFIG");
    println!();
    println!("PROXY MODE:");
    println!("    HTTP:       127.0.0.1:8080");
    println!("    SOCKS5:     127.0.0.1:1080");
    println!("    API:        127.0.0.1:8081");
    println!();
    println!("EXAMPLES:");
    println!("    metadialer-daemon route http://example.i2p/");
    println!("    curl --proxy socks5h://localhost:1080 http://example.onion/");
    println!("    curl --proxy http://localhost:8080 https://example.com");
}
