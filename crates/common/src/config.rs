use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Overlay;

/// Overlay session constants
pub mod session {
    /// Prefix of every generated session identifier
    pub const ID_PREFIX: &str = "metadialer";

    /// Number of random characters appended to the prefix
    pub const ID_RANDOM_LEN: usize = 4;

    /// Default I2P SOCKS tunnel (i2pd / Java I2P)
    pub const DEFAULT_GARLIC_SOCKS_ADDR: &str = "127.0.0.1:4447";

    /// Default Tor SocksPort
    pub const DEFAULT_ONION_SOCKS_ADDR: &str = "127.0.0.1:9050";

    /// Time allowed for the startup probe of a session endpoint
    pub const INIT_TIMEOUT_SECS: u64 = 10;
}

/// Front-end listener constants
pub mod proxy {
    /// HTTP proxy listen address
    pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";

    /// SOCKS5 proxy listen address
    pub const DEFAULT_SOCKS5_ADDR: &str = "127.0.0.1:1080";

    /// Status API listen address
    pub const DEFAULT_API_ADDR: &str = "127.0.0.1:8081";
}

/// Request-level HTTP client constants
pub mod client {
    /// Whole-request timeout, connect to last body byte (seconds)
    pub const TIMEOUT_SECS: u64 = 30;

    /// Idle connections kept for reuse across all hosts
    pub const MAX_IDLE_CONNS: usize = 10;

    /// How long an idle connection stays reusable (seconds)
    pub const IDLE_TIMEOUT_SECS: u64 = 30;
}

/// Route non-overlay traffic through Tor unless configured otherwise
pub const ANONYMOUS_BY_DEFAULT: bool = true;

/// Dialer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Route clearnet destinations through the Tor session instead of dialing directly
    pub anonymous: bool,

    /// PEM bundle replacing the platform root store for clearnet TLS
    pub root_ca_file: Option<PathBuf>,

    /// I2P session
    pub garlic: SessionConfig,

    /// Tor session
    pub onion: SessionConfig,

    /// Daemon listeners
    pub proxy: ProxyConfig,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            anonymous: ANONYMOUS_BY_DEFAULT,
            root_ca_file: None,
            garlic: SessionConfig::for_overlay(Overlay::Garlic),
            onion: SessionConfig::for_overlay(Overlay::Onion),
            proxy: ProxyConfig::default(),
        }
    }
}

impl DialerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn with_root_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_ca_file = Some(path.into());
        self
    }

    pub fn with_session(mut self, overlay: Overlay, session: SessionConfig) -> Self {
        match overlay {
            Overlay::Garlic => self.garlic = session,
            Overlay::Onion => self.onion = session,
        }
        self
    }

    pub fn session(&self, overlay: Overlay) -> &SessionConfig {
        match overlay {
            Overlay::Garlic => &self.garlic,
            Overlay::Onion => &self.onion,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Local endpoint of one overlay router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether to open the session at all
    pub enabled: bool,

    /// SOCKS5 endpoint exposed by the overlay router; the overlay's usual port when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_addr: Option<String>,

    /// Startup probe timeout
    pub init_timeout_secs: u64,
}

impl SessionConfig {
    pub fn for_overlay(overlay: Overlay) -> Self {
        let socks_addr = match overlay {
            Overlay::Garlic => session::DEFAULT_GARLIC_SOCKS_ADDR,
            Overlay::Onion => session::DEFAULT_ONION_SOCKS_ADDR,
        };

        Self {
            socks_addr: Some(socks_addr.to_string()),
            ..Self::default()
        }
    }

    pub fn with_socks_addr(mut self, addr: impl Into<String>) -> Self {
        self.socks_addr = Some(addr.into());
        self
    }

    /// SOCKS5 endpoint to use for `overlay`
    pub fn endpoint(&self, overlay: Overlay) -> &str {
        match (&self.socks_addr, overlay) {
            (Some(addr), _) => addr,
            (None, Overlay::Garlic) => session::DEFAULT_GARLIC_SOCKS_ADDR,
            (None, Overlay::Onion) => session::DEFAULT_ONION_SOCKS_ADDR,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socks_addr: None,
            init_timeout_secs: session::INIT_TIMEOUT_SECS,
        }
    }
}

/// Daemon listener addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_addr: String,
    pub socks5_addr: String,
    pub api_addr: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_addr: proxy::DEFAULT_HTTP_ADDR.to_string(),
            socks5_addr: proxy::DEFAULT_SOCKS5_ADDR.to_string(),
            api_addr: proxy::DEFAULT_API_ADDR.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}
