/// metadialer daemon library
///
/// This crate provides the daemon that fronts the dial router with
/// SOCKS5 and HTTP proxies and a small status API.

pub mod api;
pub mod proxy;
pub mod setup;

#[cfg(test)]
pub(crate) mod testing;

pub use api::ApiServer;
pub use proxy::{HttpProxy, ProxyManager, Socks5Server};
