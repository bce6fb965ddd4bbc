//! Access token generation and validation.
//!
//! Tokens are HS256 JWTs signed with the server secret. They provide
//! integrity and authenticity only; the payload is readable by anyone
//! holding the token.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of unsigned development tokens.
pub const DEV_TOKEN_PREFIX: &str = "dev:";

/// Scopes granted to every development token.
pub const DEV_SCOPES: &[&str] = &["chat:rw"];

/// Lifetime reported for development tokens.
const DEV_TOKEN_TTL_SECS: u64 = 15 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }

    /// Parse a wire value. Unknown values are rejected rather than defaulted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            _ => None,
        }
    }
}

/// Validated claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessClaims {
    /// Subject (internal user id)
    pub subject: String,
    /// Granted scopes, deduplicated, in issue order
    pub scopes: Vec<String>,
    /// Device the token was issued to
    pub device_id: Option<String>,
    pub token_type: TokenType,
    /// Issued at (Unix seconds)
    pub issued_at: u64,
    /// Expiration time (Unix seconds)
    pub expires_at: u64,
}

impl AccessClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// What to put into a new token.
#[derive(Debug, Clone, Copy)]
pub struct TokenRequest<'a> {
    pub subject: &'a str,
    pub scopes: &'a [String],
    pub device_id: Option<&'a str>,
    pub token_type: TokenType,
}

/// Claims as issued.
#[derive(Serialize)]
struct Payload<'a> {
    sub: &'a str,
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
    token_type: &'static str,
    iat: u64,
    exp: u64,
}

/// Claims as found in a correctly signed token, before validation.
#[derive(Deserialize)]
struct RawPayload {
    sub: Option<String>,
    scope: Option<String>,
    scp: Option<Vec<String>>,
    device_id: Option<String>,
    token_type: Option<String>,
    typ: Option<String>,
    iat: Option<u64>,
    exp: Option<u64>,
}

/// Signs and verifies tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    allow_dev_tokens: bool,
}

impl TokenCodec {
    /// Create a codec for the given secret.
    ///
    /// # Panics
    /// If the secret is empty. The secret is checked at startup, so an empty
    /// one here is a wiring bug.
    pub fn new(secret: &[u8]) -> Self {
        assert!(!secret.is_empty(), "token secret must not be empty");
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            allow_dev_tokens: false,
        }
    }

    /// Accept unsigned `dev:<subject>` tokens. Never enable in production.
    pub fn with_dev_tokens(mut self, allow: bool) -> Self {
        self.allow_dev_tokens = allow;
        self
    }

    pub fn dev_tokens_allowed(&self) -> bool {
        self.allow_dev_tokens
    }

    /// Sign a token valid for `ttl_secs` from now.
    pub fn sign(&self, request: &TokenRequest<'_>, ttl_secs: u64) -> Result<String, JwtError> {
        self.sign_at(request, ttl_secs, unix_now().ok_or(JwtError::TimeError)?)
    }

    /// Sign a token as if the current time were `now`.
    pub fn sign_at(
        &self,
        request: &TokenRequest<'_>,
        ttl_secs: u64,
        now: u64,
    ) -> Result<String, JwtError> {
        if request.subject.trim().is_empty() {
            return Err(JwtError::EmptySubject);
        }
        if ttl_secs == 0 {
            return Err(JwtError::InvalidTtl);
        }

        let exp = now.checked_add(ttl_secs).ok_or(JwtError::InvalidTtl)?;
        let payload = Payload {
            sub: request.subject,
            scope: normalize_scopes(request.scopes.iter().map(String::as_str)).join(" "),
            device_id: request.device_id,
            token_type: request.token_type.as_str(),
            iat: now,
            exp,
        };

        jsonwebtoken::encode(&Header::default(), &payload, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str, expected: Option<TokenType>) -> Option<AccessClaims> {
        self.verify_at(token, expected, unix_now()?)
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// Returns `None` for anything that is not a well-formed, correctly signed,
    /// unexpired token of the expected type.
    pub fn verify_at(
        &self,
        token: &str,
        expected: Option<TokenType>,
        now: u64,
    ) -> Option<AccessClaims> {
        if let Some(subject) = token.strip_prefix(DEV_TOKEN_PREFIX) {
            return self.decode_dev_token(subject, expected, now);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        // Expiry is checked against `now` in validate_payload
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<RawPayload>(token, &self.decoding_key, &validation).ok()?;
        validate_payload(data.claims, expected, now)
    }

    fn decode_dev_token(
        &self,
        subject: &str,
        expected: Option<TokenType>,
        now: u64,
    ) -> Option<AccessClaims> {
        if !self.allow_dev_tokens {
            return None;
        }
        let subject = subject.trim();
        if subject.is_empty() || matches!(expected, Some(TokenType::Refresh)) {
            return None;
        }
        Some(AccessClaims {
            subject: subject.to_string(),
            scopes: DEV_SCOPES.iter().map(|s| s.to_string()).collect(),
            device_id: None,
            token_type: TokenType::Access,
            issued_at: now,
            expires_at: now.saturating_add(DEV_TOKEN_TTL_SECS),
        })
    }
}

fn validate_payload(
    raw: RawPayload,
    expected: Option<TokenType>,
    now: u64,
) -> Option<AccessClaims> {
    let subject = raw.sub.filter(|s| !s.trim().is_empty())?;

    let exp = raw.exp?;
    if exp < now {
        return None;
    }

    let token_type = match raw.token_type.or(raw.typ) {
        Some(value) => TokenType::parse(&value)?,
        None => TokenType::Access,
    };
    if expected.is_some_and(|e| e != token_type) {
        return None;
    }

    // No scope claim at all means no scopes, never all of them.
    let scopes = match (raw.scope, raw.scp) {
        (Some(scope), _) => parse_scope_string(&scope),
        (None, Some(scp)) => normalize_scopes(scp.iter().map(String::as_str)),
        (None, None) => Vec::new(),
    };

    Some(AccessClaims {
        subject,
        scopes,
        device_id: raw.device_id.filter(|d| !d.is_empty()),
        token_type,
        issued_at: raw.iat.unwrap_or(0),
        expires_at: exp,
    })
}

/// Split a `scope` claim on spaces and commas.
pub fn parse_scope_string(scope: &str) -> Vec<String> {
    normalize_scopes(scope.split(|c: char| c == ',' || c.is_whitespace()))
}

/// Trim, drop empties, and deduplicate while keeping first-seen order.
pub fn normalize_scopes<'a>(scopes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    scopes
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(*s))
        .map(ToString::to_string)
        .collect()
}

pub(crate) fn unix_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// Errors that can occur while signing a token.
#[derive(Debug)]
pub enum JwtError {
    /// Subject was empty or whitespace
    EmptySubject,
    /// Lifetime was zero or overflowed
    InvalidTtl,
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::EmptySubject => write!(f, "Token subject must not be empty"),
            JwtError::InvalidTtl => write!(f, "Token lifetime must be positive and bounded"),
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}
