/// API request handlers

use super::responses::*;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metadialer_common::Overlay;
use metadialer_core::{top_level_label, AddressError, DialRouter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<DialRouter>,
}

/// Handler for GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    debug!("API: GET /api/status");

    let router = &state.router;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        anonymous: router.anonymous(),
        garlic: SessionStatus::from_handle(Overlay::Garlic, router.session(Overlay::Garlic)),
        onion: SessionStatus::from_handle(Overlay::Onion, router.session(Overlay::Onion)),
    })
}

/// Handler for GET /api/route?address=...
pub async fn get_route(
    State(state): State<AppState>,
    Query(query): Query<RouteQuery>,
) -> Result<Json<RouteResponse>, AppError> {
    debug!("API: GET /api/route {}", query.address);

    let label = top_level_label(&query.address)?;
    let route = state.router.route(&query.address)?;

    Ok(Json(RouteResponse {
        address: query.address,
        label,
        route,
        anonymous: route.is_anonymous(),
        overlay: route.overlay(),
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Application error type
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!("API Error: {}", self.message);

        let body = Json(ErrorResponse::new(
            self.message,
            self.status_code.as_u16(),
        ));

        (self.status_code, body).into_response()
    }
}

impl From<AddressError> for AppError {
    fn from(err: AddressError) -> Self {
        AppError::bad_request(err.to_string())
    }
}
