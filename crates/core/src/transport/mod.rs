/// Transport layer for metadialer
///
/// Provides the stream capability every backend implements, plus:
/// - Direct TCP dialing over the host network
/// - The overlay-aware TLS trust policy
/// - A URL connector layering TLS over routed streams

mod connector;
mod direct;
mod stream;
mod tls;

pub use connector::{parse_target, ConnectError, MetaConnector, MetaStream, Scheme, Target};
pub use direct::DirectDialer;
pub use stream::{AsyncStream, BoxedStream, Dialer};
pub use tls::{load_roots_pem, platform_roots, TrustError, TrustPolicy, OVERLAY_SUFFIXES};
