//! Error types for tempforms.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Why a response-secret check denied access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordDenial {
    /// The form has a response password and none was supplied.
    Required,
    /// The supplied password did not verify.
    Invalid,
}

impl std::fmt::Display for PasswordDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required => f.write_str("password required"),
            Self::Invalid => f.write_str("invalid password"),
        }
    }
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Unauthorized: {0}")]
    Unauthorized(PasswordDenial),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests, please try again later")]
    RateLimited { retry_after: u64 },

    // === Server Errors ===
    #[error("Duplicate link: {0}")]
    DuplicateLink(String),

    #[error("Failed to generate unique links after {0} attempts")]
    LinkGenerationExhausted(u32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Expired(_) => StatusCode::GONE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Validation(_) | Self::InvalidDuration(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 5xx Server Errors
            Self::DuplicateLink(_)
            | Self::LinkGenerationExhausted(_)
            | Self::Database(_)
            | Self::Redis(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Expired(_) => "EXPIRED",
            Self::Unauthorized(PasswordDenial::Required) => "PASSWORD_REQUIRED",
            Self::Unauthorized(PasswordDenial::Invalid) => "INVALID_PASSWORD",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidDuration(_) => "INVALID_DURATION",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::DuplicateLink(_) => "DUPLICATE_LINK",
            Self::LinkGenerationExhausted(_) => "LINK_GENERATION_EXHAUSTED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
        });
        match &self {
            Self::Expired(expired_at) => {
                error["expiredAt"] = json!(expired_at);
            }
            Self::Unauthorized(_) => {
                error["requiresPassword"] = json!(true);
            }
            Self::RateLimited { retry_after } => {
                error["retryAfter"] = json!(retry_after);
            }
            _ => {}
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
