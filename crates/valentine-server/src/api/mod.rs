//! HTTP handlers.
//!
//! - GET /health
//! - POST /api/yes (plus CORS preflight)
//! - GET /oauth/start, GET /oauth/callback when the OAuth flow is enabled

pub mod oauth;
pub mod send;

use axum::{Json, Router, http::StatusCode, routing::get};
use serde::Serialize;

use crate::AppState;

/// Create the application router with all endpoints mounted.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/yes", send::routes());

    if state.oauth.is_some() {
        router = router.nest("/oauth", oauth::router());
    }

    router.with_state(state)
}

/// JSON error body shared by all handlers.
#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    error: String,
}

impl ApiError {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
