use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokens {
    /// Tokens holding only a long-lived refresh token. The empty access token is
    /// already expired, so the first request triggers a refresh.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.access_token.is_empty() || now + buffer >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("missing code")]
    MissingCode,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("invalid expires_in value: {0}")]
    InvalidExpires(i64),
    #[error("invalid authorization url: {0}")]
    InvalidUrl(String),
}

/// Google OAuth application credentials, limited to the Gmail send scope.
///
/// Covers the whole token lifecycle: the consent redirect, the one-off code
/// exchange that yields a refresh token, and later access-token refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    token_endpoint: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Consent URL requesting offline access. `prompt=consent` makes Google
    /// issue a refresh token even if the user approved the app before.
    pub fn authorization_url(&self, state: &str) -> Result<Url, OAuthError> {
        Url::parse_with_params(
            AUTH_ENDPOINT,
            [
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", GMAIL_SEND_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|err| OAuthError::InvalidUrl(err.to_string()))
    }

    /// Trade an authorization code for tokens. The refresh token is empty if
    /// Google did not issue one.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
    ) -> Result<OAuthTokens, OAuthError> {
        if code.is_empty() {
            return Err(OAuthError::MissingCode);
        }

        let grant = self
            .request_tokens(
                http,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.redirect_url.as_str()),
                ],
            )
            .await?;
        grant.into_tokens(String::new())
    }

    /// New access token for `tokens`. The refresh token is carried over unless
    /// Google rotates it.
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        tokens: &OAuthTokens,
    ) -> Result<OAuthTokens, OAuthError> {
        if tokens.refresh_token.is_empty() {
            return Err(OAuthError::MissingRefreshToken);
        }

        let grant = self
            .request_tokens(
                http,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", tokens.refresh_token.as_str()),
                ],
            )
            .await?;
        grant.into_tokens(tokens.refresh_token.clone())
    }

    async fn request_tokens(
        &self,
        http: &reqwest::Client,
        grant_params: &[(&str, &str)],
    ) -> Result<TokenGrant, OAuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant_params);

        let response = http.post(&self.token_endpoint).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenGrant {
    fn into_tokens(self, fallback_refresh_token: String) -> Result<OAuthTokens, OAuthError> {
        if self.expires_in <= 0 {
            return Err(OAuthError::InvalidExpires(self.expires_in));
        }
        Ok(OAuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or(fallback_refresh_token),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        })
    }
}
