use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use super::jwt::TokenError;
use crate::response::ApiResponse;

/// Every failure the session service reports. The display text is the message
/// shown to clients; `Internal` is never shown verbatim.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("An account with this email already exists")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Required fields are missing")]
    MissingFields,
    #[error("Current password is incorrect")]
    IncorrectPassword,
    #[error("No token provided")]
    MissingToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("Invalid verification token")]
    InvalidToken,
    #[error("Session has been revoked or is unknown")]
    TokenRevokedOrUnknown,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,
    #[error("Email is already verified")]
    AlreadyVerified,
    #[error("Failed to send email, please try again later")]
    EmailDeliveryFailed,
    #[error("Validation failed")]
    Validation(BTreeMap<&'static str, String>),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateEmail => "DUPLICATE_EMAIL",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MissingFields => "MISSING_FIELDS",
            Self::IncorrectPassword => "INCORRECT_PASSWORD",
            Self::MissingToken => "MISSING_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenRevokedOrUnknown => "TOKEN_REVOKED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            Self::AlreadyVerified => "ALREADY_VERIFIED",
            Self::EmailDeliveryFailed => "EMAIL_DELIVERY_FAILED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::InvalidCredentials
            | Self::IncorrectPassword
            | Self::MissingToken
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::TokenRevokedOrUnknown => StatusCode::UNAUTHORIZED,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::MissingFields
            | Self::InvalidToken
            | Self::InvalidOrExpiredToken
            | Self::AlreadyVerified
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::EmailDeliveryFailed => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation(BTreeMap::from([(field, message.into())]))
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Invalid => Self::TokenInvalid,
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation("body", rejection.body_text())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Internal(e) => {
                error!(error = ?e, "unhandled error");
                ApiResponse::error("Internal server error", None)
            }
            Self::Validation(fields) => ApiResponse::error(
                self.to_string(),
                Some(serde_json::to_value(fields).unwrap_or_default()),
            ),
            other => ApiResponse::error(
                other.to_string(),
                Some(serde_json::json!({ "code": other.code() })),
            ),
        };
        (status, Json(body)).into_response()
    }
}
