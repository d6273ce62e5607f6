use anyhow::{bail, Context, Result};
use nowplaying::api::{create_router, AppState};
use nowplaying::auth::{SessionConfig, SessionIssuer};
use nowplaying::config::{load_config, AppConfig};
use nowplaying::credentials::{run_session_cleanup, CredentialStore, TokenVault};
use nowplaying::oauth::eligibility::TwitterConfig;
use nowplaying::oauth::provider::ProviderConfig;
use nowplaying::oauth::OAuthSettings;
use nowplaying::spotify::SpotifyClient;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables win
    let _ = dotenvy::dotenv();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nowplaying=info,tower_http=info".into()),
        )
        .init();

    info!("nowplaying starting...");

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = if Path::new(&config_path).exists() {
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from {config_path}"))?
    } else {
        AppConfig::default()
    };
    config
        .apply_env()
        .context("Invalid configuration in environment")?;
    config.validate().context("Invalid configuration")?;

    if config.server.base_url.is_empty() {
        bail!("BASE_URL is required");
    }

    let spotify_client_id =
        std::env::var("SPOTIFY_CLIENT_ID").context("SPOTIFY_CLIENT_ID is required")?;
    let spotify_client_secret =
        std::env::var("SPOTIFY_CLIENT_SECRET").context("SPOTIFY_CLIENT_SECRET is required")?;

    info!(
        port = config.server.port,
        base_url = %config.server.base_url,
        database = %config.database.path,
        production = config.server.production,
        "Configuration loaded"
    );

    // Fail before serving anything if the key cannot be used
    let vault = Arc::new(TokenVault::from_env());
    vault
        .validate()
        .context("TOKEN_ENCRYPTION_KEY must be 32 raw bytes or base64 of 32 bytes")?;
    if !vault.is_enabled() {
        warn!("TOKEN_ENCRYPTION_KEY is not set, provider tokens will be stored in plaintext");
    }

    let handshake_ttl = config
        .cleanup
        .handshake_ttl()
        .context("HANDSHAKE_TTL_SECONDS out of range")?;
    let session_duration = config
        .session
        .duration()
        .context("SESSION_DURATION_HOURS out of range")?;

    let store = Arc::new(
        CredentialStore::new(&config.database.path, Arc::clone(&vault))
            .context("Failed to initialize credential store")?
            .with_session_ttl(handshake_ttl),
    );
    info!("Credential store initialized");

    let mut session_config =
        SessionConfig::from_env().with_duration(session_duration);
    session_config.cookie_name = config.session.cookie_name.clone();
    session_config.secure_cookie |= config.server.production;
    let issuer = Arc::new(SessionIssuer::new(session_config));

    let twitter = TwitterConfig::from_env();
    info!(
        available = twitter.is_available(),
        require_misskey = twitter.require_misskey,
        allowed_hosts = twitter.allowed_hosts.len(),
        "Twitter integration configured"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("nowplaying/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let spotify = Arc::new(SpotifyClient::new(
        http.clone(),
        ProviderConfig::spotify(spotify_client_id, spotify_client_secret),
    ));

    let settings =
        OAuthSettings::new(config.server.base_url.clone()).with_app_name(config.server.app_name.clone());

    // Sweep expired MiAuth/PKCE handshakes in the background
    let cleanup_handle = tokio::spawn(run_session_cleanup(
        Arc::clone(&store),
        config.cleanup.interval_seconds,
    ));

    let state = AppState::new(store, issuer, spotify, http, settings, twitter);
    let router = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind HTTP port")?;
    info!(port = config.server.port, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    cleanup_handle.abort();
    info!("nowplaying stopped");

    Ok(())
}
