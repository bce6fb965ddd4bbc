//! OpenID Connect relying party: authorization code to external identity.
//!
//! The provider's token endpoint is called with the authorization code (and
//! PKCE verifier when the client sent one); the returned ID token supplies
//! the identity. With a JWKS URL configured the ID token signature, issuer
//! and audience are verified. Without one, the payload is only decoded and
//! the operator must have opted in to that explicitly.
//!
//! In dev mode a synthetic code `dev:<email>|<name>` skips the provider.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const DEV_CODE_PREFIX: &str = "dev:";

/// Algorithms accepted for provider-signed ID tokens.
const ID_TOKEN_ALGORITHMS: [Algorithm; 2] = [Algorithm::RS256, Algorithm::ES256];

/// Identity asserted by the external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Provider settings.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Verify ID token signatures against this key set
    pub jwks_url: Option<String>,
    /// Expected `iss` of verified ID tokens
    pub issuer: Option<String>,
    /// Accept unsigned-checked ID tokens when no JWKS URL is set
    pub allow_unverified_id_token: bool,
}

#[derive(Debug)]
pub enum OidcError {
    /// Bridge configuration is unusable
    Config(String),
    /// No provider is configured and the code is not a usable dev code
    NotConfigured,
    /// `dev:` code presented while dev mode is off
    DevCodeRejected,
    InvalidDevCode,
    EmptyCode,
    Http(String),
    TokenEndpoint(u16),
    MissingIdToken,
    MalformedIdToken,
    Verification(String),
    MissingEmail,
    EmailNotVerified,
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OidcError::Config(e) => write!(f, "Invalid OIDC configuration: {}", e),
            OidcError::NotConfigured => write!(f, "No OIDC provider configured"),
            OidcError::DevCodeRejected => write!(f, "Dev codes are disabled"),
            OidcError::InvalidDevCode => write!(f, "Malformed dev code"),
            OidcError::EmptyCode => write!(f, "Authorization code is empty"),
            OidcError::Http(e) => write!(f, "Token endpoint request failed: {}", e),
            OidcError::TokenEndpoint(status) => {
                write!(f, "Token endpoint returned status {}", status)
            }
            OidcError::MissingIdToken => write!(f, "Token response has no id_token"),
            OidcError::MalformedIdToken => write!(f, "ID token could not be decoded"),
            OidcError::Verification(e) => write!(f, "ID token verification failed: {}", e),
            OidcError::MissingEmail => write!(f, "ID token has no email"),
            OidcError::EmailNotVerified => write!(f, "Email is not verified"),
        }
    }
}

impl std::error::Error for OidcError {}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    /// Some providers send this as a string
    #[serde(default)]
    email_verified: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

pub struct OidcBridge {
    config: Option<OidcConfig>,
    dev_mode: bool,
    http: reqwest::Client,
    jwks: RwLock<Option<JwkSet>>,
}

impl OidcBridge {
    /// Build the bridge. Fails when ID tokens could not be verified and the
    /// operator has not allowed that.
    pub fn new(config: Option<OidcConfig>, dev_mode: bool) -> Result<Self, OidcError> {
        if let Some(config) = &config {
            if config.token_url.is_empty() || config.client_id.is_empty() {
                return Err(OidcError::Config(
                    "token URL and client id are required".into(),
                ));
            }
            if config.jwks_url.is_none() {
                if !config.allow_unverified_id_token {
                    return Err(OidcError::Config(
                        "set a JWKS URL or explicitly allow unverified ID tokens".into(),
                    ));
                }
                warn!("ID token signatures will NOT be verified; configure a JWKS URL");
            }
        }

        Ok(Self {
            config,
            dev_mode,
            http: reqwest::Client::new(),
            jwks: RwLock::new(None),
        })
    }

    /// Exchange an authorization code for the identity it represents.
    pub async fn exchange(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, OidcError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(OidcError::EmptyCode);
        }

        if let Some(rest) = code.strip_prefix(DEV_CODE_PREFIX) {
            if !self.dev_mode {
                return Err(OidcError::DevCodeRejected);
            }
            return parse_dev_code(rest);
        }

        let config = self.config.as_ref().ok_or(OidcError::NotConfigured)?;
        let id_token = self.request_id_token(config, code, code_verifier).await?;

        let claims = match &config.jwks_url {
            Some(jwks_url) => self.verify_id_token(config, jwks_url, &id_token).await?,
            None => decode_unverified(&id_token)?,
        };

        identity_from_claims(claims)
    }

    async fn request_id_token(
        &self,
        config: &OidcConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<String, OidcError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];
        if let Some(secret) = &config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        if let Some(verifier) = code_verifier.filter(|v| !v.is_empty()) {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(&config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| OidcError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::TokenEndpoint(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::Http(e.to_string()))?;

        body.id_token
            .filter(|t| !t.is_empty())
            .ok_or(OidcError::MissingIdToken)
    }

    async fn verify_id_token(
        &self,
        config: &OidcConfig,
        jwks_url: &str,
        id_token: &str,
    ) -> Result<IdTokenClaims, OidcError> {
        let header = decode_header(id_token).map_err(|_| OidcError::MalformedIdToken)?;
        if !ID_TOKEN_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::Verification(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| OidcError::Verification("missing kid".into()))?;

        let key = self.decoding_key(jwks_url, &kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[config.client_id.as_str()]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        decode::<IdTokenClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| OidcError::Verification(e.to_string()))
    }

    /// Find the key for `kid`, refetching the key set once on a miss so
    /// provider key rotation is picked up.
    async fn decoding_key(&self, jwks_url: &str, kid: &str) -> Result<DecodingKey, OidcError> {
        {
            let cached = self.jwks.read().await;
            if let Some(jwk) = cached.as_ref().and_then(|set| set.find(kid)) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|e| OidcError::Verification(e.to_string()));
            }
        }

        debug!(kid = %kid, "Fetching JWKS");
        let set: JwkSet = self
            .http
            .get(jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OidcError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| OidcError::Http(e.to_string()))?;

        let key = set
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| OidcError::Verification(e.to_string()))?
            .ok_or_else(|| OidcError::Verification(format!("unknown kid {}", kid)));

        *self.jwks.write().await = Some(set);
        key
    }
}

fn parse_dev_code(rest: &str) -> Result<ExternalIdentity, OidcError> {
    let (email, name) = match rest.split_once('|') {
        Some((email, name)) => (email.trim(), name.trim()),
        None => (rest.trim(), ""),
    };
    if email.is_empty() || !email.contains('@') {
        return Err(OidcError::InvalidDevCode);
    }
    Ok(ExternalIdentity {
        subject_id: format!("{}{}", DEV_CODE_PREFIX, email),
        email: email.to_string(),
        name: (!name.is_empty()).then(|| name.to_string()),
    })
}

/// Decode the ID token payload without checking its signature.
fn decode_unverified(id_token: &str) -> Result<IdTokenClaims, OidcError> {
    jsonwebtoken::dangerous::insecure_decode::<IdTokenClaims>(id_token)
        .map(|data| data.claims)
        .map_err(|_| OidcError::MalformedIdToken)
}

fn identity_from_claims(claims: IdTokenClaims) -> Result<ExternalIdentity, OidcError> {
    let email = claims
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or(OidcError::MissingEmail)?;

    let verified = match claims.email_verified {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => !s.eq_ignore_ascii_case("false"),
        _ => true,
    };
    if !verified {
        return Err(OidcError::EmailNotVerified);
    }

    let subject_id = claims
        .sub
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| email.clone());

    Ok(ExternalIdentity {
        subject_id,
        email,
        name: claims.name.filter(|n| !n.trim().is_empty()),
    })
}
