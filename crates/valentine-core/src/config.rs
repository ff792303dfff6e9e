use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;
use std::{env, path::Path};
use thiserror::Error;

use crate::message::MessageConfig;

const DEFAULT_GIF_URL: &str = "https://media.giphy.com/media/3oEjI4sFlp73fvEYgw/giphy.gif";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub telemetry: TelemetryConfig,
    pub gmail: GmailConfig,
    pub email: EmailConfig,
    pub event: EventConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub export_traces: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    /// May be empty until the OAuth flow has been completed once.
    pub refresh_token: String,
    pub sender: String,
    pub user_id: String,
    pub enable_oauth_flow: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    pub subject: String,
    pub date: String,
    pub gif_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventConfig {
    pub title: String,
    pub description: String,
    pub date: String,
    pub all_day: bool,
    pub time_zone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    pub cors_origin: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("invalid port override: {0}")]
    InvalidPort(std::num::ParseIntError),
    #[error("invalid boolean for {key}: {value}")]
    InvalidBool { key: &'static str, value: String },
}

impl Config {
    /// Load configuration from built-in defaults and the optional file at `path`,
    /// apply environment overrides, resolve any `env:` indirections, and validate
    /// the fields needed to send mail.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = defaults()
            .map_err(ConfigError::ConfigBuild)?
            .add_source(config::File::from(path.as_ref()).required(false))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn message_config(&self) -> MessageConfig {
        MessageConfig::from(self)
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.gmail.refresh_token.is_empty()
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = env_value("PORT").or_else(|| env_value("APP_PORT")) {
            self.app.port = port.parse().map_err(ConfigError::InvalidPort)?;
        }

        if let Some(otlp) = env_value("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }

        override_string("GMAIL_CLIENT_ID", &mut self.gmail.client_id);
        override_string("GMAIL_CLIENT_SECRET", &mut self.gmail.client_secret);
        override_string("GMAIL_REDIRECT_URL", &mut self.gmail.redirect_url);
        override_string("GMAIL_REFRESH_TOKEN", &mut self.gmail.refresh_token);
        override_string("GMAIL_SENDER", &mut self.gmail.sender);
        if let Some(value) = env_value("ENABLE_OAUTH_FLOW") {
            self.gmail.enable_oauth_flow = value.eq_ignore_ascii_case("true");
        }

        if let Some(value) = env_value("EMAIL_RECIPIENTS") {
            self.email.recipients = split_and_trim(&value);
        }
        override_string("EMAIL_SUBJECT", &mut self.email.subject);
        override_string("EMAIL_DATE", &mut self.email.date);
        override_string("EMAIL_GIF_URL", &mut self.email.gif_url);

        override_string("EVENT_TITLE", &mut self.event.title);
        override_string("EVENT_DESCRIPTION", &mut self.event.description);
        override_string("EVENT_DATE", &mut self.event.date);
        override_string("EVENT_TIME_ZONE", &mut self.event.time_zone);
        if let Some(value) = env_value("EVENT_ALL_DAY") {
            self.event.all_day = parse_bool("EVENT_ALL_DAY", &value)?;
        }

        override_string("CORS_ORIGIN", &mut self.http.cors_origin);

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker(&mut self.gmail.client_id)?;
        apply_env_marker(&mut self.gmail.client_secret)?;
        apply_env_marker(&mut self.gmail.redirect_url)?;
        apply_env_marker(&mut self.gmail.refresh_token)?;
        apply_env_marker(&mut self.gmail.sender)?;
        for recipient in &mut self.email.recipients {
            apply_env_marker(recipient)?;
        }
        if let Some(endpoint) = &mut self.telemetry.otlp_endpoint {
            apply_env_marker(endpoint)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gmail.client_id.is_empty()
            || self.gmail.client_secret.is_empty()
            || self.gmail.redirect_url.is_empty()
        {
            return Err(ConfigError::MissingField(
                "GMAIL_CLIENT_ID, GMAIL_CLIENT_SECRET, or GMAIL_REDIRECT_URL",
            ));
        }

        if self.gmail.sender.is_empty() {
            return Err(ConfigError::MissingField("GMAIL_SENDER"));
        }

        if self.email.recipients.is_empty() {
            return Err(ConfigError::MissingField("EMAIL_RECIPIENTS"));
        }

        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("app.service_name", "valentine")?
        .set_default("app.port", 8080)?
        .set_default("app.env", "dev")?
        .set_default("telemetry.export_traces", false)?
        .set_default("gmail.client_id", "")?
        .set_default("gmail.client_secret", "")?
        .set_default("gmail.redirect_url", "")?
        .set_default("gmail.refresh_token", "")?
        .set_default("gmail.sender", "")?
        .set_default("gmail.user_id", "me")?
        .set_default("gmail.enable_oauth_flow", false)?
        .set_default("email.subject", "Valentine Date")?
        .set_default("email.date", "March 14, 2026")?
        .set_default("email.gif_url", DEFAULT_GIF_URL)?
        .set_default("event.title", "Valentine Date")?
        .set_default(
            "event.description",
            "We are officially booked for our valentine date!",
        )?
        .set_default("event.date", "2026-03-14")?
        .set_default("event.all_day", true)?
        .set_default("event.time_zone", "Asia/Kuala_Lumpur")?
        .set_default("http.cors_origin", "*")
}

/// Trimmed environment value; blank counts as unset.
fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn override_string(key: &str, target: &mut String) {
    if let Some(value) = env_value(key) {
        *target = value;
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

/// Split a comma separated list, trimming entries and dropping blanks.
pub fn split_and_trim(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}
