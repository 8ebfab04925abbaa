/// Dial routing
///
/// Picks the backend for every outbound connection from the address alone:
/// `.i2p` goes to the garlic session, `.onion` to the onion session, and
/// everything else either exits through the onion session (anonymous mode)
/// or connects directly.

use crate::classify::{classify, AddressClass, AddressError};
use crate::session::{SessionError, SessionHandle};
use crate::transport::{BoxedStream, Dialer, DirectDialer};
use async_trait::async_trait;
use metadialer_common::config::ANONYMOUS_BY_DEFAULT;
use metadialer_common::{Overlay, Route};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Networks an onion service stream may be requested with
const ONION_NETWORKS: [&str; 4] = ["tcp", "tcp4", "tcp6", "onion"];

/// Immutable router over the resolved sessions
pub struct DialRouter {
    garlic: SessionHandle,
    onion: SessionHandle,
    direct: Arc<dyn Dialer>,
    anonymous: bool,
}

impl DialRouter {
    pub fn builder() -> DialRouterBuilder {
        DialRouterBuilder::new()
    }

    /// Whether clearnet traffic exits through the onion session
    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn session(&self, overlay: Overlay) -> &SessionHandle {
        match overlay {
            Overlay::Garlic => &self.garlic,
            Overlay::Onion => &self.onion,
        }
    }

    /// Backend that `dial` would use for `address`
    pub fn route(&self, address: &str) -> Result<Route, AddressError> {
        let route = match classify(address)? {
            AddressClass::I2p => Route::Garlic,
            AddressClass::Onion => Route::Onion,
            AddressClass::Ip | AddressClass::Other(_) if self.anonymous => Route::OnionExit,
            AddressClass::Ip | AddressClass::Other(_) => Route::Direct,
        };

        Ok(route)
    }

    /// Open a stream to `address` over the backend its class selects
    pub async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream, DialError> {
        let route = self.route(address)?;
        debug!("Routing {} {} via {}", network, address, route);

        match route {
            Route::Garlic => {
                let dialer = self.ready(Overlay::Garlic)?;
                Ok(dialer.dial(network, address).await?)
            }
            Route::Onion => {
                let dialer = self.ready(Overlay::Onion)?;
                if !ONION_NETWORKS.contains(&network) {
                    return Err(DialError::unsupported(network, route));
                }
                Ok(dialer.dial("onion", address).await?)
            }
            Route::OnionExit => {
                let dialer = self.ready(Overlay::Onion)?;
                if network != "tcp" {
                    return Err(DialError::unsupported(network, route));
                }
                Ok(dialer.dial(network, address).await?)
            }
            Route::Direct => Ok(self.direct.dial(network, address).await?),
        }
    }

    /// `dial`, abandoned as soon as `cancel` fires.
    ///
    /// Dropping the in-flight dial closes any half-open socket it holds.
    pub async fn dial_with_cancel(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<BoxedStream, DialError> {
        if cancel.is_cancelled() {
            return Err(DialError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dial to {} cancelled", address);
                Err(DialError::Cancelled)
            }
            result = self.dial(network, address) => result,
        }
    }

    fn ready(&self, overlay: Overlay) -> Result<&Arc<dyn Dialer>, DialError> {
        match self.session(overlay) {
            SessionHandle::Ready(dialer) => Ok(dialer),
            SessionHandle::Failed(err) => Err(DialError::ProviderUnavailable {
                overlay,
                source: err.clone(),
            }),
        }
    }
}

#[async_trait]
impl Dialer for DialRouter {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        DialRouter::dial(self, network, address)
            .await
            .map_err(io::Error::from)
    }
}

/// Builder for `DialRouter`
pub struct DialRouterBuilder {
    garlic: Option<SessionHandle>,
    onion: Option<SessionHandle>,
    direct: Arc<dyn Dialer>,
    anonymous: bool,
}

impl DialRouterBuilder {
    pub fn new() -> Self {
        Self {
            garlic: None,
            onion: None,
            direct: Arc::new(DirectDialer::new()),
            anonymous: ANONYMOUS_BY_DEFAULT,
        }
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn garlic(mut self, session: SessionHandle) -> Self {
        self.garlic = Some(session);
        self
    }

    pub fn onion(mut self, session: SessionHandle) -> Self {
        self.onion = Some(session);
        self
    }

    pub fn session(self, overlay: Overlay, session: SessionHandle) -> Self {
        match overlay {
            Overlay::Garlic => self.garlic(session),
            Overlay::Onion => self.onion(session),
        }
    }

    /// Replace the clearnet dialer used when anonymity is off
    pub fn direct(mut self, dialer: impl Dialer + 'static) -> Self {
        self.direct = Arc::new(dialer);
        self
    }

    /// Unset sessions count as disabled
    pub fn build(self) -> DialRouter {
        let or_disabled = |handle: Option<SessionHandle>, overlay| {
            handle.unwrap_or_else(|| SessionHandle::failed(SessionError::Disabled(overlay)))
        };

        DialRouter {
            garlic: or_disabled(self.garlic, Overlay::Garlic),
            onion: or_disabled(self.onion, Overlay::Onion),
            direct: self.direct,
            anonymous: self.anonymous,
        }
    }
}

impl Default for DialRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dial errors, in decreasing priority
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("{overlay} provider unavailable: {source}")]
    ProviderUnavailable {
        overlay: Overlay,
        source: Arc<SessionError>,
    },

    #[error("network {network} not supported on {route} route")]
    UnsupportedNetwork { network: String, route: Route },

    #[error("dial cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DialError {
    fn unsupported(network: &str, route: Route) -> Self {
        Self::UnsupportedNetwork {
            network: network.to_string(),
            route,
        }
    }
}

impl From<DialError> for io::Error {
    fn from(err: DialError) -> Self {
        let kind = match &err {
            DialError::Io(e) => e.kind(),
            DialError::InvalidAddress(_) | DialError::UnsupportedNetwork { .. } => {
                io::ErrorKind::InvalidInput
            }
            DialError::ProviderUnavailable { .. } => io::ErrorKind::NotConnected,
            DialError::Cancelled => io::ErrorKind::Interrupted,
        };
        io::Error::new(kind, err)
    }
}
