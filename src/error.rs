//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Postgres SQLSTATEs worth retrying (serialization failure, deadlock)
const RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01"];

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict,

    #[error("Version conflict: balance was modified concurrently")]
    VersionConflict,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] crate::domain::DomainError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Serialization failures and deadlocks can succeed on a fresh attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::VersionConflict => true,
            AppError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .map(|code| RETRYABLE_SQLSTATES.iter().any(|c| *c == code))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// HTTP status, stable error code and optional details
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidOperation(op) => {
                (StatusCode::BAD_REQUEST, "invalid_operation", Some(op.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key", None),

            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            AppError::UserNotFound(id) => {
                (StatusCode::NOT_FOUND, "user_not_found", Some(id.clone()))
            }

            AppError::IdempotencyConflict => (StatusCode::CONFLICT, "idempotency_conflict", None),
            AppError::VersionConflict => (StatusCode::CONFLICT, "version_conflict", None),

            AppError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded", None)
            }

            AppError::Domain(domain_err) => {
                use crate::domain::DomainError;
                let details = Some(domain_err.to_string());
                match domain_err {
                    DomainError::InsufficientBalance { .. } => {
                        (StatusCode::BAD_REQUEST, "insufficient_balance", details)
                    }
                    DomainError::BalanceLocked { .. } => {
                        (StatusCode::BAD_REQUEST, "balance_locked", details)
                    }
                    DomainError::InvalidAmount(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_amount", details)
                    }
                    DomainError::SelfAllocation => {
                        (StatusCode::BAD_REQUEST, "self_allocation", details)
                    }
                    DomainError::NotCreator { .. } => {
                        (StatusCode::FORBIDDEN, "not_creator", details)
                    }
                    DomainError::BusinessRuleViolation(_) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "business_rule_violation",
                        details,
                    ),
                    DomainError::InvariantViolation(msg) => {
                        tracing::error!("Ledger invariant violated: {}", msg);
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
                    }
                }
            }

            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    pub fn error_code(&self) -> &'static str {
        self.parts().1
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();

        // Server-side failures never leak their message
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<crate::domain::AmountError> for AppError {
    fn from(err: crate::domain::AmountError) -> Self {
        AppError::Domain(err.into())
    }
}
