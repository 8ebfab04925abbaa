/// REST API module for the metadialer daemon
///
/// Provides HTTP endpoints for local clients to query:
/// - Routing policy and overlay session status
/// - The route a given address would take

pub mod handlers;
pub mod responses;
pub mod server;

pub use responses::*;
pub use server::ApiServer;
