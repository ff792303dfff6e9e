//! Construction of the invite email.
//!
//! Everything in here is a pure function of its inputs: the caller supplies the
//! current time, a unique identifier and the image bytes, so the same inputs
//! always produce a byte-identical message.

pub mod calendar;
pub mod mime;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Config;

pub use calendar::{build_invite, escape_text};
pub use mime::{Boundaries, build_message, wrap_base64};

/// Content-ID used by the HTML body to reference the inline image.
pub const INLINE_IMAGE_CID: &str = "valentine-gif";

/// Line terminator required by RFC 5322 and RFC 5545.
pub(crate) const CRLF: &str = "\r\n";

/// Everything the builder needs to know about the message and its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    /// Human readable date shown in the bodies, e.g. "March 14, 2026".
    pub date: String,
    pub gif_url: String,
    pub event_title: String,
    pub event_description: String,
    /// Calendar date of the event as `YYYY-MM-DD`.
    pub event_date: String,
    pub all_day: bool,
    pub time_zone: String,
}

impl From<&Config> for MessageConfig {
    fn from(config: &Config) -> Self {
        Self {
            sender: config.gmail.sender.clone(),
            recipients: config.email.recipients.clone(),
            subject: config.email.subject.clone(),
            date: config.email.date.clone(),
            gif_url: config.email.gif_url.clone(),
            event_title: config.event.title.clone(),
            event_description: config.event.description.clone(),
            event_date: config.event.date.clone(),
            all_day: config.event.all_day,
            time_zone: config.event.time_zone.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MessageBuildError {
    #[error("invalid event date {value:?}: {reason}")]
    InvalidDate { value: String, reason: String },
    #[error("embedded image is empty")]
    EmptyImage,
}

/// GIF bytes attached inline to the HTML body. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage(Vec<u8>);

impl EmbeddedImage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, MessageBuildError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(MessageBuildError::EmptyImage);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Builds invite messages around a fixed inline image.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    image: EmbeddedImage,
}

impl MessageBuilder {
    pub fn new(image: EmbeddedImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &EmbeddedImage {
        &self.image
    }

    /// Assemble the raw RFC 5322 message. The result is not transport encoded.
    pub fn build(
        &self,
        config: &MessageConfig,
        now: DateTime<Utc>,
        uid: &str,
    ) -> Result<String, MessageBuildError> {
        build_message(config, self.image.as_bytes(), now, uid)
    }
}
