pub mod classify;
pub mod client;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, extract_hostname, top_level_label, AddressClass, AddressError};
pub use client::{ClientError, MetaHttpClient};
pub use router::{DialError, DialRouter, DialRouterBuilder};

// Re-export session types
pub use session::{generate_session_id, SessionError, SessionHandle, SocksSession};

// Re-export transport types
pub use transport::{
    parse_target, BoxedStream, ConnectError, Dialer, DirectDialer, MetaConnector, MetaStream,
    Target, TrustError, TrustPolicy,
};

pub use metadialer_common::{Overlay, Route};
