/// API Server implementation

use super::handlers::*;
use anyhow::Result;
use axum::{routing::get, Router};
use metadialer_core::DialRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

/// API Server exposing routing policy and session status
pub struct ApiServer {
    listen_addr: SocketAddr,
    router: Arc<DialRouter>,
}

impl ApiServer {
    pub fn new(listen_addr: SocketAddr, router: Arc<DialRouter>) -> Self {
        Self {
            listen_addr,
            router,
        }
    }

    /// Build the router with all endpoints
    pub fn app(router: Arc<DialRouter>) -> Router {
        let state = AppState { router };

        Router::new()
            .route("/health", get(health_check))
            .route("/api/status", get(get_status))
            .route("/api/route", get(get_route))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until `shutdown` fires
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = Self::app(self.router);

        info!("API server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::echo_router;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use metadialer_common::Route;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = echo_router();
        let response = ApiServer::app(router)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_status() {
        let (router, _) = echo_router();
        let (status, json) = get_json(ApiServer::app(router), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["anonymous"], true);
        assert_eq!(json["onion"]["available"], true);
        assert_eq!(json["onion"]["session_id"], "metadialer-echo");
        assert_eq!(json["garlic"]["available"], false);
        assert_eq!(
            json["garlic"]["error"],
            "garlic session disabled by configuration"
        );
    }

    #[tokio::test]
    async fn test_route() {
        let (router, calls) = echo_router();
        let app = ApiServer::app(router);

        let (status, json) = get_json(app.clone(), "/api/route?address=http://abc.onion/x").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["label"], "onion");
        assert_eq!(json["route"], "onion");
        assert_eq!(json["anonymous"], true);
        assert_eq!(json["overlay"], "onion");

        let (_, json) = get_json(app.clone(), "/api/route?address=1.2.3.4").await;
        assert_eq!(json["label"], "ip");
        assert_eq!(json["route"], "onion-exit");
        assert_eq!(json["route"], Route::OnionExit.to_string());

        let (_, json) = get_json(app, "/api/route?address=example.i2p").await;
        assert_eq!(json["route"], "garlic");
        assert_eq!(json["overlay"], "garlic");

        // Inspection never dials
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_invalid_address() {
        let (router, _) = echo_router();
        let (status, json) = get_json(ApiServer::app(router), "/api/route?address=").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
    }
}
