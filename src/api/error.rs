//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::refresh::{RefreshError, StoreError};

/// Machine-readable error codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingToken,
    InvalidToken,
    MissingSession,
    InsufficientScope,
    InvalidRefreshToken,
    AuthFailed,
    OriginNotAllowed,
    RateLimited,
    BadRequest,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingToken => "missing_token",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::MissingSession => "missing_session",
            ErrorCode::InsufficientScope => "insufficient_scope",
            ErrorCode::InvalidRefreshToken => "invalid_refresh_token",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::OriginNotAllowed => "origin_not_allowed",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingToken
            | ErrorCode::InvalidToken
            | ErrorCode::MissingSession
            | ErrorCode::InvalidRefreshToken
            | ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientScope | ErrorCode::OriginNotAllowed => StatusCode::FORBIDDEN,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generic outward message. Never carries the specific failure reason.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingToken => "Authentication required",
            ErrorCode::InvalidToken => "Invalid or expired token",
            ErrorCode::MissingSession => "No active session",
            ErrorCode::InsufficientScope => "Insufficient scope",
            ErrorCode::InvalidRefreshToken => "Invalid refresh token",
            ErrorCode::AuthFailed => "Authentication failed",
            ErrorCode::OriginNotAllowed => "Origin not allowed",
            ErrorCode::RateLimited => "Too many requests. Please try again later.",
            ErrorCode::BadRequest => "Bad request",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

/// Extension trait for concise error mapping on store Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for Result<T, StoreError> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::store_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, msg)
    }

    pub fn auth_failed() -> Self {
        ErrorCode::AuthFailed.into()
    }

    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        ErrorCode::InternalError.into()
    }

    pub fn store_error(context: &str, e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(detail) => {
                error!("{}: store unavailable: {}", context, detail);
                ErrorCode::ServiceUnavailable.into()
            }
            other => Self::internal(context, other),
        }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::InvalidRefreshToken => ErrorCode::InvalidRefreshToken.into(),
            RefreshError::Unavailable(detail) => {
                error!("Refresh store unavailable: {}", detail);
                ErrorCode::ServiceUnavailable.into()
            }
            RefreshError::Internal(detail) => Self::internal("Refresh failed", detail),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: ErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.code.status(),
            Json(ErrorResponse {
                code: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_as_wire_names() {
        for code in [
            ErrorCode::MissingToken,
            ErrorCode::InsufficientScope,
            ErrorCode::InvalidRefreshToken,
            ErrorCode::OriginNotAllowed,
            ErrorCode::ServiceUnavailable,
        ] {
            assert_eq!(
                serde_json::to_value(code).unwrap(),
                serde_json::Value::String(code.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_refresh_errors_stay_generic() {
        let err = ApiError::from(RefreshError::InvalidRefreshToken);
        assert_eq!(err.code(), ErrorCode::InvalidRefreshToken);
        assert_eq!(err.message, "Invalid refresh token");

        let err = ApiError::from(RefreshError::Unavailable("pool timed out".into()));
        assert_eq!(err.code().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(RefreshError::Internal("disk I/O error".into()));
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.message, "Internal error");
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::from(ErrorCode::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
