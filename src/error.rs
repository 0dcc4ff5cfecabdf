use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Expected vs Unexpected
///
/// `RateLimited`, `CsrfInvalid`, `InvalidCredentials`, `Conflict` and
/// `BadRequest` are expected, user-facing outcomes and are logged at `warn`.
/// Everything else is unexpected: logged at `error` with full context and
/// rendered to the client as a generic message.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        reset_at: DateTime<Utc>,
        status: StatusCode,
    },

    #[error("CSRF token missing, invalid or mismatched")]
    CsrfInvalid,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Whether this error is an expected, user-caused outcome.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. }
                | AppError::CsrfInvalid
                | AppError::InvalidCredentials
                | AppError::Conflict(_)
                | AppError::BadRequest(_)
        )
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(rename = "resetTime", skip_serializing_if = "Option::is_none")]
    reset_time: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if self.is_expected() {
            tracing::warn!(error = %self, "Request rejected");
        } else {
            tracing::error!(error = %self, "Request failed");
        }

        let (status, message) = match &self {
            AppError::RateLimited {
                message,
                reset_at,
                status,
            } => {
                let retry_after = (*reset_at - Utc::now()).num_seconds().max(1);
                let mut response = (
                    *status,
                    axum::Json(ErrorResponse {
                        error: message.clone(),
                        reset_time: Some(*reset_at),
                    }),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            AppError::CsrfInvalid => (StatusCode::FORBIDDEN, "Invalid request".to_string()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            // Dependency errors - don't leak connection details
            AppError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable. Please try again later.".to_string(),
            ),

            // Internal errors - never expose internal details to clients
            AppError::Internal(_) | AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: message,
            reset_time: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
