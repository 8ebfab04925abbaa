/// Overlay sessions
///
/// A session is the long-lived handle to one overlay router (I2P or Tor).
/// It is opened once at startup; whatever the attempt produced, a ready
/// dialer or an error, is frozen in a `SessionHandle` for the lifetime of
/// the process.

pub mod socks;

pub use socks::SocksSession;

use crate::transport::Dialer;
use metadialer_common::config::session::{ID_PREFIX, ID_RANDOM_LEN};
use metadialer_common::Overlay;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Outcome of opening an overlay session
#[derive(Clone)]
pub enum SessionHandle {
    Ready(Arc<dyn Dialer>),
    Failed(Arc<SessionError>),
}

impl SessionHandle {
    pub fn ready(dialer: impl Dialer + 'static) -> Self {
        Self::Ready(Arc::new(dialer))
    }

    pub fn failed(err: SessionError) -> Self {
        Self::Failed(Arc::new(err))
    }

    pub fn from_result<D: Dialer + 'static>(result: Result<D, SessionError>) -> Self {
        match result {
            Ok(dialer) => Self::ready(dialer),
            Err(err) => Self::failed(err),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Initialization error, if the session never came up
    pub fn error(&self) -> Option<&Arc<SessionError>> {
        match self {
            Self::Ready(_) => None,
            Self::Failed(err) => Some(err),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Ready(dialer) => dialer.session_id(),
            Self::Failed(_) => None,
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(dialer) => f
                .debug_tuple("Ready")
                .field(&dialer.session_id().unwrap_or("-"))
                .finish(),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl<D: Dialer + 'static> From<Result<D, SessionError>> for SessionHandle {
    fn from(result: Result<D, SessionError>) -> Self {
        Self::from_result(result)
    }
}

/// Fresh session identifier, e.g. `metadialer-x7Qa`.
///
/// Keeps concurrent instances that share one overlay router apart.
pub fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_RANDOM_LEN)
        .map(char::from)
        .collect();

    format!("{}-{}", ID_PREFIX, suffix)
}

/// Session initialization errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0} session disabled by configuration")]
    Disabled(Overlay),

    #[error("{overlay} router unreachable at {endpoint}: {reason}")]
    Unreachable {
        overlay: Overlay,
        endpoint: String,
        reason: String,
    },

    #[error("{overlay} router at {endpoint} rejected the handshake: {reason}")]
    Handshake {
        overlay: Overlay,
        endpoint: String,
        reason: String,
    },

    #[error("{overlay} router at {endpoint} did not answer within {secs}s")]
    Timeout {
        overlay: Overlay,
        endpoint: String,
        secs: u64,
    },
}
