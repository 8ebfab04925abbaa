/// API Response types

use metadialer_common::{Overlay, Route};
use metadialer_core::SessionHandle;
use serde::{Deserialize, Serialize};

/// Overall daemon status
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Daemon version
    pub version: String,
    /// Whether clearnet traffic exits through Tor
    pub anonymous: bool,
    /// I2P session
    pub garlic: SessionStatus,
    /// Tor session
    pub onion: SessionStatus,
}

/// State of one overlay session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub overlay: Overlay,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Initialization error, if the session never came up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn from_handle(overlay: Overlay, handle: &SessionHandle) -> Self {
        Self {
            overlay,
            available: handle.is_ready(),
            session_id: handle.session_id().map(str::to_string),
            error: handle.error().map(|e| e.to_string()),
        }
    }
}

/// Query string of GET /api/route
#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    pub address: String,
}

/// Routing decision for an address
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteResponse {
    /// The address as queried
    pub address: String,
    /// Top-level label the decision was made on
    pub label: String,
    pub route: Route,
    /// Whether the route goes through an overlay network
    pub anonymous: bool,
    /// Overlay session carrying the connection, none for direct
    pub overlay: Option<Overlay>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
