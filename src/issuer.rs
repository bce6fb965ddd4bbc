//! Minting of access/refresh token pairs.
//!
//! The access token is a signed [`TokenCodec`] token. The refresh token is an
//! independent opaque random string, so nothing learned from an access token
//! helps forge a refresh token. Minting never touches storage: callers hash
//! the raw refresh value with [`hash_refresh_token`] and persist it.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::jwt::{JwtError, TokenCodec, TokenRequest, TokenType, normalize_scopes, unix_now};

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 30 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Upper bound for either lifetime.
pub const MAX_TOKEN_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Random bytes behind each refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// A freshly minted token pair. The raw refresh token exists only here.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub access_token_expires_at: u64,
    /// Unix seconds
    pub refresh_token_expires_at: u64,
    /// Scopes embedded in the access token, normalized
    pub scopes: Vec<String>,
}

impl TokenPair {
    pub fn access_token_expires_in(&self, now: u64) -> u64 {
        self.access_token_expires_at.saturating_sub(now)
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    codec: Arc<TokenCodec>,
    access_ttl: u64,
    refresh_ttl: u64,
}

impl TokenIssuer {
    pub fn new(codec: Arc<TokenCodec>, access_ttl: u64, refresh_ttl: u64) -> Self {
        Self {
            codec,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn access_ttl(&self) -> u64 {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> u64 {
        self.refresh_ttl
    }

    /// Mint a new pair for `user_id` on `device_id`.
    pub fn issue(
        &self,
        user_id: &str,
        device_id: &str,
        scopes: &[String],
    ) -> Result<TokenPair, JwtError> {
        self.issue_at(user_id, device_id, scopes, unix_now().ok_or(JwtError::TimeError)?)
    }

    pub fn issue_at(
        &self,
        user_id: &str,
        device_id: &str,
        scopes: &[String],
        now: u64,
    ) -> Result<TokenPair, JwtError> {
        if self.refresh_ttl == 0 {
            return Err(JwtError::InvalidTtl);
        }
        let access_token_expires_at = expiry(now, self.access_ttl)?;
        let refresh_token_expires_at = expiry(now, self.refresh_ttl)?;

        let scopes = normalize_scopes(scopes.iter().map(String::as_str));
        let access_token = self.codec.sign_at(
            &TokenRequest {
                subject: user_id,
                scopes: &scopes,
                device_id: Some(device_id),
                token_type: TokenType::Access,
            },
            self.access_ttl,
            now,
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token: generate_refresh_token(),
            access_token_expires_at,
            refresh_token_expires_at,
            scopes,
        })
    }
}

/// `now + ttl`, kept within what the store can hold as a signed timestamp.
fn expiry(now: u64, ttl: u64) -> Result<u64, JwtError> {
    now.checked_add(ttl)
        .filter(|exp| i64::try_from(*exp).is_ok())
        .ok_or(JwtError::InvalidTtl)
}

/// Generate an opaque refresh token from the OS random source.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a refresh token for storage.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
