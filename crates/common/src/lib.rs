//! Shared configuration and routing types for metadialer.

pub mod config;
pub mod types;

pub use config::{ConfigError, DialerConfig, ProxyConfig, SessionConfig};
pub use types::{Overlay, Route};
