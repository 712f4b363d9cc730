//! Web-layer error type and HTTP mapping
//!
//! Every error carries a user-facing message; internal detail is logged at
//! the conversion site and never rendered. Library errors from the auth and
//! shared crates convert into this type so handlers can use `?` throughout.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use launchkit_auth::{PasswordError, SessionError, TokenError};
use launchkit_shared::{CacheError, DbError};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request shape or field contents rejected; `fields` names the inputs
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<&'static str>,
    },

    /// Credentials, links, or tokens were not acceptable. The message stays
    /// generic; the distinguishing reason is only logged.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("Resource not found")]
    NotFound,

    #[error(transparent)]
    Db(#[from] DbError),

    /// Postgres, Redis, email, or CAPTCHA dependency fault
    #[error("Internal server error. Please try again later.")]
    Internal,
}

impl ApiError {
    pub fn validation(message: impl Into<String>, fields: &[&'static str]) -> Self {
        Self::Validation {
            message: message.into(),
            fields: fields.to_vec(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, fields) = match self {
            ApiError::Validation { message, fields } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, fields)
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message, Vec::new())
            }
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message, Vec::new()),
            ApiError::RateLimited(message) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                message,
                Vec::new(),
            ),
            ApiError::NotFound | ApiError::Db(DbError::NotFound) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Resource not found".to_string(),
                Vec::new(),
            ),
            ApiError::Db(DbError::UniqueViolation(_)) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "Resource already exists".to_string(),
                Vec::new(),
            ),
            ApiError::Db(DbError::Other(_)) | ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error. Please try again later.".to_string(),
                Vec::new(),
            ),
        };

        let mut error = json!({ "code": code, "message": message });
        if !fields.is_empty() {
            error["fields"] = json!(fields);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        let err = DbError::from(err);
        if matches!(err, DbError::Other(_)) {
            tracing::error!(error = ?err, "database error");
        }
        ApiError::Db(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Db(inner) => ApiError::from(inner),
            // Callers that expect an empty fan-out match this variant out
            // before converting
            SessionError::NoLiveSessions => {
                tracing::warn!("session fan-out found no live sessions");
                ApiError::Internal
            }
            SessionError::Cache(inner) => {
                tracing::error!(error = %inner, "session cache failure");
                ApiError::Internal
            }
            SessionError::Encoding(inner) => {
                tracing::error!(error = %inner, "session payload encoding failure");
                ApiError::Internal
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(detail) => {
                tracing::error!(detail = %detail, "token signing failed");
                ApiError::Internal
            }
            reason => {
                tracing::debug!(reason = %reason, "token rejected");
                ApiError::Unauthorized("Invalid or expired link. Please request a new one.".to_string())
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort | PasswordError::TooLong => ApiError::validation(
                "Password must be between 8 and 32 characters.",
                &["password"],
            ),
            PasswordError::Hashing(detail) | PasswordError::InvalidHash(detail) => {
                tracing::error!(detail = %detail, "password hashing failure");
                ApiError::Internal
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!(error = %err, "cache failure");
        ApiError::Internal
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        // Never log the URL; dispatch URLs embed tokens
        tracing::error!(error = %err, "outbound http failure");
        ApiError::Internal
    }
}

impl From<axum::http::header::InvalidHeaderValue> for ApiError {
    fn from(err: axum::http::header::InvalidHeaderValue) -> Self {
        tracing::error!(error = %err, "header value construction failed");
        ApiError::Internal
    }
}
