/// Startup helpers shared by the daemon binaries

use anyhow::{Context, Result};
use metadialer_common::{DialerConfig, Overlay};
use metadialer_core::{DialRouter, SessionHandle, SocksSession, TrustPolicy};
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable overriding the configuration path
pub const CONFIG_ENV: &str = "METADIALER_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "metadialer.toml";

pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the configuration, writing the defaults out when there is none
pub fn load_config() -> Result<DialerConfig> {
    let config_path = config_path();

    if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
        return DialerConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()));
    }

    info!("No configuration file found, using defaults");
    let config = DialerConfig::default();

    if let Err(e) = config.to_file(&config_path) {
        warn!("Failed to save default config: {}", e);
    } else {
        info!("Saved default configuration to {:?}", config_path);
    }

    Ok(config)
}

/// Open one overlay session; failures are kept, not fatal
pub async fn open_session(config: &DialerConfig, overlay: Overlay) -> SessionHandle {
    let result = SocksSession::connect(overlay, config.session(overlay)).await;

    if let Err(e) = &result {
        warn!("{} session unavailable: {}", overlay, e);
    }

    SessionHandle::from_result(result)
}

/// Open both sessions and build the router over them
pub async fn build_router(config: &DialerConfig) -> DialRouter {
    let (garlic, onion) = tokio::join!(
        open_session(config, Overlay::Garlic),
        open_session(config, Overlay::Onion)
    );

    DialRouter::builder()
        .anonymous(config.anonymous)
        .garlic(garlic)
        .onion(onion)
        .build()
}

/// Trust policy over the configured CA bundle, or the platform roots
pub fn trust_policy(config: &DialerConfig) -> Result<TrustPolicy> {
    let policy = match &config.root_ca_file {
        Some(path) => TrustPolicy::from_pem_file(path)
            .with_context(|| format!("Failed to load root CAs from {}", path.display()))?,
        None => TrustPolicy::new(None)?,
    };

    Ok(policy)
}
