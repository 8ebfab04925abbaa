use serde::{Deserialize, Serialize};
use std::fmt;

/// Anonymity overlay networks a connection can be carried over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlay {
    /// I2P (garlic routing)
    Garlic,
    /// Tor (onion routing)
    Onion,
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Garlic => write!(f, "garlic"),
            Self::Onion => write!(f, "onion"),
        }
    }
}

/// Backend chosen for a single dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    /// `.i2p` destination through the I2P session
    Garlic,
    /// `.onion` service through the Tor session
    Onion,
    /// Clearnet destination tunnelled out through a Tor exit
    OnionExit,
    /// Clearnet destination dialed directly
    Direct,
}

impl Route {
    /// Overlay session the route depends on, if any
    pub fn overlay(&self) -> Option<Overlay> {
        match self {
            Self::Garlic => Some(Overlay::Garlic),
            Self::Onion | Self::OnionExit => Some(Overlay::Onion),
            Self::Direct => None,
        }
    }

    /// Whether the connection leaves through an overlay network
    pub fn is_anonymous(&self) -> bool {
        self.overlay().is_some()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Garlic => write!(f, "garlic"),
            Self::Onion => write!(f, "onion"),
            Self::OnionExit => write!(f, "onion-exit"),
            Self::Direct => write!(f, "direct"),
        }
    }
}
