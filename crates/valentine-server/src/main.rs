mod api;

use std::{env, net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use valentine_core::gmail::OAuthClient;
use valentine_core::{Config, EmbeddedImage, Mailer, MessageBuilder, init_telemetry};

/// GIF attached inline to every invite.
const VALENTINE_GIF: &[u8] = include_bytes!("../assets/valentine.gif");

#[derive(Clone)]
pub struct AppState {
    /// Absent until a refresh token has been configured.
    pub mailer: Option<Arc<Mailer>>,
    /// Present only when the OAuth onboarding endpoints are enabled.
    pub oauth: Option<Arc<OAuthClient>>,
    pub http: reqwest::Client,
    pub cors_origin: String,
}

impl AppState {
    fn from_config(config: &Config) -> Result<Self, valentine_core::MessageBuildError> {
        let http = reqwest::Client::new();
        let builder = MessageBuilder::new(EmbeddedImage::new(VALENTINE_GIF)?);

        let mailer = if config.has_refresh_token() {
            Some(Arc::new(Mailer::from_config(config, http.clone(), builder)))
        } else {
            warn!("GMAIL_REFRESH_TOKEN is empty, /api/yes will fail");
            None
        };

        let oauth = config.gmail.enable_oauth_flow.then(|| {
            Arc::new(OAuthClient::new(
                config.gmail.client_id.clone(),
                config.gmail.client_secret.clone(),
                config.gmail.redirect_url.clone(),
            ))
        });

        Ok(Self {
            mailer,
            oauth,
            http,
            cors_origin: config.http.cors_origin.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let state = AppState::from_config(&config)?;
    let app = api::router(state);

    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        oauth_flow = config.gmail.enable_oauth_flow,
        "valentine listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use valentine_core::config::{
        AppConfig, EmailConfig, EventConfig, GmailConfig, HttpConfig, TelemetryConfig,
    };

    pub(crate) fn test_config(refresh_token: &str, enable_oauth_flow: bool) -> Config {
        Config {
            app: AppConfig {
                service_name: "valentine".into(),
                port: 0,
                env: "dev".into(),
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: None,
                export_traces: false,
            },
            gmail: GmailConfig {
                client_id: "client".into(),
                client_secret: "secret".into(),
                redirect_url: "http://localhost:8080/oauth/callback".into(),
                refresh_token: refresh_token.into(),
                sender: "sender@example.com".into(),
                user_id: "me".into(),
                enable_oauth_flow,
            },
            email: EmailConfig {
                recipients: vec!["r@example.com".into()],
                subject: "Valentine Date".into(),
                date: "March 14, 2026".into(),
                gif_url: "https://example.com/gif".into(),
            },
            event: EventConfig {
                title: "Valentine Date".into(),
                description: "Can't wait".into(),
                date: "2026-03-14".into(),
                all_day: true,
                time_zone: "Asia/Kuala_Lumpur".into(),
            },
            http: HttpConfig {
                cors_origin: "https://example.com".into(),
            },
        }
    }

    #[test]
    fn embedded_gif_is_present() {
        assert!(VALENTINE_GIF.starts_with(b"GIF89a"));
    }

    #[test]
    fn state_without_refresh_token_has_no_mailer() {
        let state = AppState::from_config(&test_config("", false)).expect("state");
        assert!(state.mailer.is_none());
        assert!(state.oauth.is_none());
        assert_eq!(state.cors_origin, "https://example.com");
    }

    #[test]
    fn state_with_refresh_token_and_oauth_flow() {
        let state = AppState::from_config(&test_config("refresh", true)).expect("state");
        let mailer = state.mailer.expect("mailer configured");
        assert_eq!(mailer.message_config().recipients, vec!["r@example.com"]);
        let oauth = state.oauth.expect("oauth enabled");
        assert_eq!(oauth.client_id, "client");
    }
}
