//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::Database;
use crate::issuer::{
    ACCESS_TOKEN_DURATION_SECS, MAX_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS,
};
use crate::jwt::normalize_scopes;
use crate::oidc::{OidcConfig, OidcError};
use crate::rate_limit::RateLimitConfig;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;

const TOKEN_SECRET_ENV: &str = "TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessiongate",
    about = "Token issuance, rotation and request authorization for the chat API"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7300")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "sessiongate.db")]
    pub database: String,

    /// Path to file containing the token signing secret. Prefer the TOKEN_SECRET env var
    #[arg(long)]
    pub token_secret_file: Option<String>,

    /// Origin allowed to call the API cross-origin (repeatable or comma separated)
    #[arg(long = "allowed-origin", env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = ACCESS_TOKEN_DURATION_SECS)]
    pub access_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = REFRESH_TOKEN_DURATION_SECS)]
    pub refresh_ttl: u64,

    /// Scope granted at login (repeatable or comma separated)
    #[arg(long = "login-scope", value_delimiter = ',', default_value = "chat:rw")]
    pub login_scopes: Vec<String>,

    /// Accept browser session cookies when no bearer token is sent
    #[arg(long)]
    pub cookie_fallback: bool,

    /// Name of the browser session cookie
    #[arg(long, default_value = crate::auth::SESSION_COOKIE_NAME)]
    pub session_cookie: String,

    /// Local development: accept `dev:` tokens and codes. Never use in production
    #[arg(long)]
    pub dev_mode: bool,

    /// Key rate limits on X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Identity provider token endpoint
    #[arg(long, env = "OIDC_TOKEN_URL")]
    pub oidc_token_url: Option<String>,

    /// OAuth client id
    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    /// OAuth client secret (public clients using PKCE omit it)
    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub oidc_client_secret: Option<String>,

    /// Redirect URI registered with the provider
    #[arg(long, env = "OIDC_REDIRECT_URI")]
    pub oidc_redirect_uri: Option<String>,

    /// Provider JWKS URL used to verify ID token signatures
    #[arg(long, env = "OIDC_JWKS_URL")]
    pub oidc_jwks_url: Option<String>,

    /// Expected ID token issuer
    #[arg(long, env = "OIDC_ISSUER")]
    pub oidc_issuer: Option<String>,

    /// Trust ID tokens without signature verification when no JWKS URL is set
    #[arg(long)]
    pub oidc_allow_unverified_id_token: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Startup configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    MissingSecret,
    SecretFile(String),
    SecretTooShort,
    InvalidOrigin(String),
    InvalidTtl(&'static str),
    IncompleteOidc(&'static str),
    InvalidUrl(String),
    Oidc(OidcError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingSecret => write!(
                f,
                "Token secret is required. Set {} environment variable (recommended) or use --token-secret-file",
                TOKEN_SECRET_ENV
            ),
            ConfigError::SecretFile(e) => write!(f, "Failed to read token secret file: {}", e),
            ConfigError::SecretTooShort => write!(
                f,
                "Token secret is shorter than {} bytes. Use a longer secret",
                MIN_TOKEN_SECRET_LENGTH
            ),
            ConfigError::InvalidOrigin(o) => write!(f, "Invalid allowed origin: {}", o),
            ConfigError::InvalidTtl(which) => write!(
                f,
                "{} must be between 1 and {} seconds",
                which, MAX_TOKEN_DURATION_SECS
            ),
            ConfigError::IncompleteOidc(missing) => {
                write!(f, "OIDC configuration is incomplete: {} is required", missing)
            }
            ConfigError::InvalidUrl(u) => write!(f, "Invalid URL: {}", u),
            ConfigError::Oidc(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<OidcError> for ConfigError {
    fn from(e: OidcError) -> Self {
        ConfigError::Oidc(e)
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the token secret from the environment or a file.
pub fn load_token_secret(token_secret_file: Option<&str>) -> Result<Vec<u8>, ConfigError> {
    let secret = if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(TOKEN_SECRET_ENV) };
        secret
    } else if let Some(path) = token_secret_file {
        std::fs::read_to_string(path)
            .map_err(|e| ConfigError::SecretFile(format!("{}: {}", path, e)))?
            .trim()
            .to_string()
    } else {
        return Err(ConfigError::MissingSecret);
    };

    validate_secret(secret)
}

fn validate_secret(secret: String) -> Result<Vec<u8>, ConfigError> {
    if secret.len() < MIN_TOKEN_SECRET_LENGTH {
        return Err(ConfigError::SecretTooShort);
    }
    Ok(secret.into_bytes())
}

/// Parse an allowed origin into its canonical `scheme://host[:port]` form.
pub fn parse_origin(origin: &str) -> Result<String, ConfigError> {
    let url = Url::parse(origin.trim()).map_err(|_| ConfigError::InvalidOrigin(origin.into()))?;

    let has_path = !matches!(url.path(), "" | "/");
    if !matches!(url.scheme(), "http" | "https")
        || url.host_str().is_none()
        || has_path
        || url.query().is_some()
    {
        return Err(ConfigError::InvalidOrigin(origin.into()));
    }

    let is_https = url.scheme() == "https";
    let is_localhost = matches!(url.host_str(), Some("localhost" | "127.0.0.1"));
    if !is_https && !is_localhost {
        warn!(origin = %origin, "Allowed origin does not use HTTPS");
    }

    Ok(url.origin().ascii_serialization())
}

fn validate_url(value: &str) -> Result<String, ConfigError> {
    Url::parse(value)
        .map(|_| value.to_string())
        .map_err(|_| ConfigError::InvalidUrl(value.to_string()))
}

/// Build the provider configuration. No provider at all is valid (dev mode
/// or cookie-only deployments); a half-configured one is not.
pub fn build_oidc_config(args: &Args) -> Result<Option<OidcConfig>, ConfigError> {
    let (token_url, client_id) = match (&args.oidc_token_url, &args.oidc_client_id) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err(ConfigError::IncompleteOidc("--oidc-client-id")),
        (None, Some(_)) => return Err(ConfigError::IncompleteOidc("--oidc-token-url")),
        (Some(url), Some(id)) => (url, id),
    };
    let redirect_uri = args
        .oidc_redirect_uri
        .as_deref()
        .ok_or(ConfigError::IncompleteOidc("--oidc-redirect-uri"))?;

    Ok(Some(OidcConfig {
        token_url: validate_url(token_url)?,
        client_id: client_id.clone(),
        client_secret: args.oidc_client_secret.clone().filter(|s| !s.is_empty()),
        redirect_uri: redirect_uri.to_string(),
        jwks_url: args.oidc_jwks_url.as_deref().map(validate_url).transpose()?,
        issuer: args.oidc_issuer.clone(),
        allow_unverified_id_token: args.oidc_allow_unverified_id_token,
    }))
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    token_secret: Vec<u8>,
) -> Result<ServerConfig, ConfigError> {
    let ttl_in_range = |ttl: u64| (1..=MAX_TOKEN_DURATION_SECS).contains(&ttl);
    if !ttl_in_range(args.access_ttl) {
        return Err(ConfigError::InvalidTtl("--access-ttl"));
    }
    if !ttl_in_range(args.refresh_ttl) {
        return Err(ConfigError::InvalidTtl("--refresh-ttl"));
    }

    let allowed_origins = args
        .allowed_origins
        .iter()
        .filter(|o| !o.trim().is_empty())
        .map(|o| parse_origin(o))
        .collect::<Result<Vec<_>, _>>()?;

    if args.dev_mode {
        warn!("Dev mode enabled: dev: tokens and codes are accepted");
    }

    Ok(ServerConfig {
        db,
        token_secret,
        allowed_origins,
        access_ttl: args.access_ttl,
        refresh_ttl: args.refresh_ttl,
        login_scopes: normalize_scopes(args.login_scopes.iter().map(String::as_str)),
        cookie_fallback: args.cookie_fallback,
        session_cookie_name: args.session_cookie.clone(),
        dev_mode: args.dev_mode,
        rate_limits: Arc::new(RateLimitConfig::new(args.trust_forwarded_for)),
        oidc: build_oidc_config(args)?,
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
