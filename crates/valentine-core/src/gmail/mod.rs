pub mod client;
pub mod oauth;
pub mod types;

pub use client::{GmailClient, GmailClientError, encode_raw_message};
pub use oauth::{DEFAULT_REFRESH_BUFFER, GMAIL_SEND_SCOPE, OAuthClient, OAuthError, OAuthTokens};
pub use types::*;
