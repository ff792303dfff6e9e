use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::gmail::oauth::{DEFAULT_REFRESH_BUFFER, OAuthClient, OAuthError, OAuthTokens};
use crate::gmail::types::{SendMessageRequest, SentMessage};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Error)]
pub enum GmailClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
}

/// Encode a raw RFC 5322 message for the `raw` field of the send API.
pub fn encode_raw_message(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Gmail send client for one mailbox. Access tokens live in memory only and
/// are refreshed from the configured refresh token as they expire.
pub struct GmailClient {
    http: Client,
    oauth: OAuthClient,
    user_id: String,
    api_base: String,
    tokens: RwLock<OAuthTokens>,
    refresh_lock: Mutex<()>,
}

impl GmailClient {
    pub fn new(
        http: Client,
        oauth: OAuthClient,
        user_id: impl Into<String>,
        tokens: OAuthTokens,
    ) -> Self {
        Self {
            http,
            oauth,
            user_id: user_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            tokens: RwLock::new(tokens),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Send an already base64url encoded message.
    ///
    /// A 401 triggers one forced token refresh and a single retry.
    pub async fn send_message(&self, raw: String) -> Result<SentMessage, GmailClientError> {
        let body = SendMessageRequest { raw };

        let token = self.access_token(false).await?;
        let mut response = self.post_send(&token, &body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("gmail rejected access token, refreshing");
            let token = self.access_token(true).await?;
            response = self.post_send(&token, &body).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(GmailClientError::Unauthorized);
            }
        }

        let body = response.error_for_status()?.text().await?;
        let sent: SentMessage = serde_json::from_str(&body)?;
        info!(message_id = %sent.id, "gmail accepted message");
        Ok(sent)
    }

    async fn post_send(
        &self,
        access_token: &str,
        body: &SendMessageRequest,
    ) -> Result<Response, GmailClientError> {
        let url = format!("{}/{}/messages/send", self.api_base, self.user_id);
        Ok(self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?)
    }

    /// Current access token, refreshed when close to expiry or when `force` is
    /// set. Concurrent callers share a single refresh.
    async fn access_token(&self, force: bool) -> Result<String, GmailClientError> {
        if !force {
            if let Some(token) = self.cached_token().await {
                return Ok(token);
            }
        }

        let _refreshing = self.refresh_lock.lock().await;
        if !force {
            if let Some(token) = self.cached_token().await {
                return Ok(token);
            }
        }

        let current = self.tokens.read().await.clone();
        let refreshed = self.oauth.refresh(&self.http, &current).await?;
        debug!(expires_at = %refreshed.expires_at, "refreshed gmail access token");

        let token = refreshed.access_token.clone();
        *self.tokens.write().await = refreshed;
        Ok(token)
    }

    async fn cached_token(&self) -> Option<String> {
        let tokens = self.tokens.read().await;
        (!tokens.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER))
            .then(|| tokens.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SEND_PATH: &str = "/gmail/v1/users/me/messages/send";

    fn make_client(server: &MockServer, tokens: OAuthTokens) -> GmailClient {
        let oauth = OAuthClient::new("client", "secret", "http://localhost/oauth/callback")
            .with_token_endpoint(format!("{}/token", server.uri()));
        GmailClient::new(reqwest::Client::new(), oauth, "me", tokens)
            .with_api_base(format!("{}/gmail/v1/users", server.uri()))
    }

    fn valid_tokens(access_token: &str) -> OAuthTokens {
        OAuthTokens {
            access_token: access_token.into(),
            refresh_token: "refresh_old".into(),
            expires_at: Utc::now() + Duration::minutes(30),
        }
    }

    async fn mount_token_endpoint(server: &MockServer, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn encode_raw_message_is_url_safe_without_padding() {
        let encoded = encode_raw_message("Subject: ??>\r\n\r\nhi");
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        let decoded = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).expect("decode");
        assert_eq!(decoded, b"Subject: ??>\r\n\r\nhi");
    }

    #[tokio::test]
    async fn send_message_posts_raw_payload() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({ "raw": "cmF3" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sent-1",
                "threadId": "thread-1",
                "labelIds": ["SENT"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server, valid_tokens("token"));
        let sent = client
            .send_message("cmF3".to_string())
            .await
            .expect("send succeeds");

        assert_eq!(sent.id, "sent-1");
        assert_eq!(sent.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(sent.label_ids, vec!["SENT".to_string()]);
    }

    #[tokio::test]
    async fn refreshed_token_is_reused_across_sends() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "new_token").await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer new_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "sent" })))
            .expect(2)
            .mount(&server)
            .await;

        let client = make_client(&server, OAuthTokens::from_refresh_token("refresh_one"));
        for _ in 0..2 {
            client
                .send_message("cmF3".to_string())
                .await
                .expect("send succeeds");
        }

        let tokens = client.tokens.read().await;
        assert_eq!(tokens.access_token, "new_token");
        assert_eq!(tokens.refresh_token, "refresh_one");
    }

    #[tokio::test]
    async fn concurrent_sends_share_one_refresh() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "shared_token").await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer shared_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "sent" })))
            .expect(3)
            .mount(&server)
            .await;

        let client = make_client(&server, OAuthTokens::from_refresh_token("refresh"));
        let (a, b, c) = tokio::join!(
            client.send_message("YQ".to_string()),
            client.send_message("Yg".to_string()),
            client.send_message("Yw".to_string()),
        );
        for result in [a, b, c] {
            result.expect("send succeeds");
        }
    }

    #[tokio::test]
    async fn retries_after_unauthorized_and_uses_refreshed_token() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "fresh_token").await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer old_token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer fresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "sent" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server, valid_tokens("old_token"));
        let sent = client
            .send_message("cmF3".to_string())
            .await
            .expect("send succeeds");
        assert_eq!(sent.id, "sent");
    }

    #[tokio::test]
    async fn returns_unauthorized_if_retry_still_fails() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "fresh_token").await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let err = make_client(&server, valid_tokens("old_token"))
            .send_message("cmF3".to_string())
            .await
            .expect_err("should be unauthorized");
        assert!(matches!(err, GmailClientError::Unauthorized));
    }

    #[tokio::test]
    async fn surfaces_rate_limit_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = make_client(&server, valid_tokens("token"))
            .send_message("cmF3".to_string())
            .await
            .expect_err("rate limited");
        match err {
            GmailClientError::Http(err) => {
                assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn returns_decode_error_on_invalid_json() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = make_client(&server, valid_tokens("token"))
            .send_message("cmF3".to_string())
            .await
            .expect_err("decode error");
        assert!(matches!(err, GmailClientError::Decode(_)));
    }

    #[tokio::test]
    async fn missing_refresh_token_is_an_oauth_error() {
        let server = MockServer::start().await;

        let err = make_client(&server, OAuthTokens::from_refresh_token(""))
            .send_message("cmF3".to_string())
            .await
            .expect_err("no refresh token");
        assert!(matches!(
            err,
            GmailClientError::OAuth(OAuthError::MissingRefreshToken)
        ));
    }
}
