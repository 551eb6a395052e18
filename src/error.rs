//! Error types for the Biblion server

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::loan::LoanStatus;

/// Stable numeric codes returned in error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchBook = 4,
    NoSuchLoan = 5,
    NoStockAvailable = 6,
    InvalidTransition = 7,
    Duplicate = 8,
    BadValue = 9,
    TooManyRequests = 10,
    Unavailable = 11,
    Timeout = 12,
    NoSuchData = 13,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Book {0} not found")]
    BookNotFound(i64),

    #[error("Loan {0} not found")]
    LoanNotFound(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No copies available for book {0}")]
    NoStockAvailable(i64),

    #[error("Cannot {action} loan {loan_id} while it is {from}")]
    InvalidTransition {
        loan_id: i64,
        from: LoanStatus,
        action: &'static str,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many requests, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Operation deadline exceeded")]
    Timeout,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Business outcomes (missing rows, exhausted stock, illegal transitions)
    /// and malformed input are final.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(e) => is_transient_db_error(e),
            AppError::Timeout | AppError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// SQLSTATE 40001 (serialization_failure) and 40P01 (deadlock_detected)
pub(crate) fn is_retryable_tx_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

fn is_transient_db_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed
    ) || is_retryable_tx_error(e)
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Unavailable(format!("Redis: {}", e))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::BookNotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchBook, self.to_string())
            }
            AppError::LoanNotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchLoan, self.to_string())
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone())
            }
            AppError::NoStockAvailable(_) => {
                (StatusCode::CONFLICT, ErrorCode::NoStockAvailable, self.to_string())
            }
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, ErrorCode::InvalidTransition, self.to_string())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::TooManyRequests { retry_after_secs } => {
                retry_after = Some(*retry_after_secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorCode::TooManyRequests,
                    "Too many login attempts".to_string(),
                )
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Dependency unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorCode::Unavailable,
                    "Request not accepted, try again".to_string(),
                )
            }
            AppError::Timeout => {
                (StatusCode::GATEWAY_TIMEOUT, ErrorCode::Timeout, self.to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
            retry_after_secs: retry_after,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_response_carries_retry_after_header() {
        let response = AppError::TooManyRequests { retry_after_secs: 120 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "120");
    }

    #[test]
    fn stock_exhaustion_is_a_conflict() {
        let response = AppError::NoStockAvailable(3).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn business_errors_are_not_transient() {
        assert!(!AppError::NoStockAvailable(1).is_transient());
        assert!(!AppError::BookNotFound(1).is_transient());
        assert!(!AppError::BadRequest("x".into()).is_transient());
        assert!(AppError::Timeout.is_transient());
        assert!(AppError::Unavailable("redis".into()).is_transient());
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!AppError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
