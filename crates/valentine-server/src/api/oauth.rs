//! OAuth onboarding endpoints used once to obtain a refresh token.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ApiError;
use crate::AppState;

const DEFAULT_STATE: &str = "valentine";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", get(start))
        .route("/callback", get(callback))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshTokenResponse {
    refresh_token: String,
}

fn not_enabled() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("oauth flow is not enabled")),
    )
        .into_response()
}

/// GET /oauth/start
///
/// Redirect to Google's consent screen.
async fn start(State(state): State<AppState>, Query(query): Query<StartQuery>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return not_enabled();
    };

    let oauth_state = query
        .state
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_STATE);

    match oauth.authorization_url(oauth_state) {
        Ok(url) => (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to build authorization url");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(err.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /oauth/callback
///
/// Exchange the authorization code and return the refresh token so it can be
/// copied into `GMAIL_REFRESH_TOKEN`.
async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return not_enabled();
    };

    let code = query.code.unwrap_or_default();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiError::new("missing code"))).into_response();
    }

    match oauth.exchange_code(&state.http, &code).await {
        Ok(tokens) => {
            if tokens.refresh_token.is_empty() {
                warn!("token response did not include a refresh token");
            } else {
                info!("obtained refresh token from oauth callback");
            }
            (
                StatusCode::OK,
                Json(RefreshTokenResponse {
                    refresh_token: tokens.refresh_token,
                }),
            )
                .into_response()
        }
        Err(err) => {
            warn!(error = %err, "authorization code exchange failed");
            (StatusCode::BAD_REQUEST, Json(ApiError::new(err.to_string()))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::json_body;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use valentine_core::gmail::OAuthClient;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_state(token_endpoint: Option<String>) -> AppState {
        let mut client = OAuthClient::new("client", "secret", "http://localhost/oauth/callback");
        if let Some(endpoint) = token_endpoint {
            client = client.with_token_endpoint(endpoint);
        }
        AppState {
            mailer: None,
            oauth: Some(Arc::new(client)),
            http: reqwest::Client::new(),
            cors_origin: "*".into(),
        }
    }

    fn location_params(response: &Response) -> HashMap<String, String> {
        let location = response.headers()[header::LOCATION]
            .to_str()
            .expect("location header");
        let url = reqwest::Url::parse(location).expect("valid url");
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        url.query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn start_redirects_with_default_state() {
        let response = start(State(oauth_state(None)), Query(StartQuery::default())).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let params = location_params(&response);
        assert_eq!(params.get("state").map(String::as_str), Some("valentine"));
        assert_eq!(params.get("access_type").map(String::as_str), Some("offline"));
    }

    #[tokio::test]
    async fn start_uses_supplied_state() {
        let query = StartQuery {
            state: Some("  abc ".into()),
        };
        let response = start(State(oauth_state(None)), Query(query)).await;
        assert_eq!(location_params(&response).get("state").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn callback_requires_code() {
        let response = callback(State(oauth_state(None)), Query(CallbackQuery::default())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "missing code");
    }

    #[tokio::test]
    async fn callback_returns_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = oauth_state(Some(format!("{}/token", server.uri())));
        let query = CallbackQuery {
            code: Some("abc".into()),
        };
        let response = callback(State(state), Query(query)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "refresh_token": "refresh" }));
    }

    #[tokio::test]
    async fn callback_reports_exchange_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let state = oauth_state(Some(format!("{}/token", server.uri())));
        let query = CallbackQuery {
            code: Some("abc".into()),
        };
        let response = callback(State(state), Query(query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap_or_default().contains("400"));
    }

    #[tokio::test]
    async fn disabled_flow_returns_not_found() {
        let mut state = oauth_state(None);
        state.oauth = None;
        let response = start(State(state), Query(StartQuery::default())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
