//! Authentication error types.

use axum::response::{IntoResponse, Response};

use crate::api::{ApiError, ErrorCode};

/// Why the gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingToken,
    InvalidToken,
    MissingSession,
    InsufficientScope,
    /// Session resolver could not be reached
    ServiceUnavailable,
    Internal,
}

impl AuthRejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthRejection::MissingToken => ErrorCode::MissingToken,
            AuthRejection::InvalidToken => ErrorCode::InvalidToken,
            AuthRejection::MissingSession => ErrorCode::MissingSession,
            AuthRejection::InsufficientScope => ErrorCode::InsufficientScope,
            AuthRejection::ServiceUnavailable => ErrorCode::ServiceUnavailable,
            AuthRejection::Internal => ErrorCode::InternalError,
        }
    }
}

impl From<AuthRejection> for ApiError {
    fn from(rejection: AuthRejection) -> Self {
        rejection.code().into()
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
