pub mod config;
pub mod gmail;
pub mod mailer;
pub mod message;
pub mod telemetry;

pub use config::Config;
pub use mailer::{Mailer, MailerError, new_message_uid};
pub use message::{
    EmbeddedImage, MessageBuildError, MessageBuilder, MessageConfig, build_invite, build_message,
};
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
