//! The send operation: build the invite and hand it to Gmail.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::gmail::{
    GmailClient, GmailClientError, OAuthClient, OAuthTokens, SentMessage, encode_raw_message,
};
use crate::message::{MessageBuildError, MessageBuilder, MessageConfig};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("failed to build message: {0}")]
    Build(#[from] MessageBuildError),
    #[error("failed to send message: {0}")]
    Gmail(#[from] GmailClientError),
}

/// Fresh identifier for one message; used as the calendar UID and to derive
/// MIME boundaries.
pub fn new_message_uid() -> String {
    Uuid::new_v4().to_string()
}

pub struct Mailer {
    client: GmailClient,
    builder: MessageBuilder,
    message: MessageConfig,
}

impl Mailer {
    pub fn new(client: GmailClient, builder: MessageBuilder, message: MessageConfig) -> Self {
        Self {
            client,
            builder,
            message,
        }
    }

    /// Mailer for the configured Gmail account, authenticating with the
    /// configured refresh token.
    pub fn from_config(config: &Config, http: reqwest::Client, builder: MessageBuilder) -> Self {
        let oauth = OAuthClient::new(
            config.gmail.client_id.clone(),
            config.gmail.client_secret.clone(),
            config.gmail.redirect_url.clone(),
        );
        let client = GmailClient::new(
            http,
            oauth,
            config.gmail.user_id.clone(),
            OAuthTokens::from_refresh_token(config.gmail.refresh_token.clone()),
        );
        Self::new(client, builder, config.message_config())
    }

    pub fn message_config(&self) -> &MessageConfig {
        &self.message
    }

    /// Send the invite using the current time and a new uid.
    pub async fn send(&self) -> Result<SentMessage, MailerError> {
        self.send_with(Utc::now(), &new_message_uid()).await
    }

    #[instrument(skip(self), fields(recipients = self.message.recipients.len()))]
    pub async fn send_with(
        &self,
        now: DateTime<Utc>,
        uid: &str,
    ) -> Result<SentMessage, MailerError> {
        let message = self.builder.build(&self.message, now, uid)?;
        let raw = encode_raw_message(&message);
        let sent = self.client.send_message(raw).await?;
        info!(
            message_id = %sent.id,
            recipients = self.message.recipients.len(),
            "invite sent"
        );
        Ok(sent)
    }
}
