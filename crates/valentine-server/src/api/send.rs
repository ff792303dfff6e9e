//! POST /api/yes: send the invite.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodRouter, post},
};
use serde::Serialize;
use tracing::{error, info};

use super::ApiError;
use crate::AppState;

pub fn routes() -> MethodRouter<AppState> {
    post(send_invite)
        .options(preflight)
        .fallback(method_not_allowed)
}

#[derive(Debug, Serialize)]
struct SendResponse {
    status: &'static str,
}

type CorsHeaders = [(header::HeaderName, String); 3];

fn cors_headers(origin: &str) -> CorsHeaders {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.to_string()),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "POST, OPTIONS".to_string(),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type".to_string(),
        ),
    ]
}

async fn preflight(State(state): State<AppState>) -> Response {
    (StatusCode::NO_CONTENT, cors_headers(&state.cors_origin)).into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ApiError::new("method not allowed")),
    )
        .into_response()
}

async fn send_invite(State(state): State<AppState>) -> Response {
    let cors = cors_headers(&state.cors_origin);

    let Some(mailer) = state.mailer.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            cors,
            Json(ApiError::new("email service not configured")),
        )
            .into_response();
    };

    match mailer.send().await {
        Ok(sent) => {
            info!(message_id = %sent.id, "invite sent via /api/yes");
            (StatusCode::OK, cors, Json(SendResponse { status: "sent" })).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to send invite");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                cors,
                Json(ApiError::new(err.to_string())),
            )
                .into_response()
        }
    }
}
