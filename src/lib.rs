pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod cors;
pub mod db;
pub mod issuer;
pub mod jwt;
pub mod oidc;
pub mod rate_limit;
pub mod refresh;

use api::{ApiContext, create_api_router};
use auth::{AuthGate, CookieSessionResolver};
use axum::{Router, middleware};
use cli::ConfigError;
use cors::{AllowedOrigins, cors_middleware};
use db::Database;
use issuer::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS, TokenIssuer};
use jwt::TokenCodec;
use oidc::{OidcBridge, OidcConfig};
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub token_secret: Vec<u8>,
    /// Canonical origins allowed cross-origin
    pub allowed_origins: Vec<String>,
    /// Access token lifetime in seconds
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl: u64,
    /// Scopes granted at login
    pub login_scopes: Vec<String>,
    /// Whether browser session cookies authenticate when no bearer token is sent
    pub cookie_fallback: bool,
    pub session_cookie_name: String,
    /// Accept `dev:` tokens and codes
    pub dev_mode: bool,
    /// Per-IP limiters, shared with the cleanup scheduler
    pub rate_limits: Arc<RateLimitConfig>,
    /// Identity provider; None when only dev codes are used
    pub oidc: Option<OidcConfig>,
}

impl ServerConfig {
    /// Configuration with default lifetimes and scopes and no provider.
    pub fn new(db: Database, token_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            db,
            token_secret: token_secret.into(),
            allowed_origins: Vec::new(),
            access_ttl: ACCESS_TOKEN_DURATION_SECS,
            refresh_ttl: REFRESH_TOKEN_DURATION_SECS,
            login_scopes: vec!["chat:rw".to_string()],
            cookie_fallback: false,
            session_cookie_name: auth::SESSION_COOKIE_NAME.to_string(),
            dev_mode: false,
            rate_limits: Arc::new(RateLimitConfig::new(false)),
            oidc: None,
        }
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, ConfigError> {
    let codec = Arc::new(TokenCodec::new(&config.token_secret).with_dev_tokens(config.dev_mode));
    let issuer = Arc::new(TokenIssuer::new(
        codec.clone(),
        config.access_ttl,
        config.refresh_ttl,
    ));

    let mut gate = AuthGate::new(codec);
    if config.cookie_fallback {
        gate = gate.with_session_resolver(Arc::new(CookieSessionResolver::new(
            config.db.web_sessions(),
            config.session_cookie_name.clone(),
        )));
    }

    let oidc = Arc::new(OidcBridge::new(config.oidc.clone(), config.dev_mode)?);

    let api_router = create_api_router(ApiContext {
        gate,
        issuer,
        refresh_store: Arc::new(config.db.refresh_tokens()),
        users: config.db.users(),
        oidc,
        login_scopes: config.login_scopes.clone(),
        rate_limits: config.rate_limits.clone(),
    });

    let allowed_origins = Arc::new(AllowedOrigins::new(&config.allowed_origins));

    // CORS is outermost so every response, errors included, carries its headers
    Ok(Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn_with_state(
            allowed_origins,
            cors_middleware,
        )))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(&config.db).await;
    cleanup::spawn_cleanup_scheduler(config.db.clone(), config.rate_limits.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
