//! Error types for Marquee
//!
//! Every failure the core can report is a distinct variant so calling code
//! can branch on the kind rather than on a message.

use hyper::StatusCode;
use tracing::error;

use crate::validation::ValidationErrors;

/// Main error type for Marquee operations
#[derive(Debug, thiserror::Error)]
pub enum MarqueeError {
    #[error("the requested resource could not be found")]
    NotFound,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("a user with this email address already exists")]
    DuplicateEmail,

    #[error("invalid or missing authentication token")]
    InvalidOrExpiredToken,

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("you must be authenticated to access this resource")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Unauthorized(String),

    #[error("store operation '{0}' exceeded its deadline")]
    Timeout(&'static str),

    #[error("the server encountered a problem and could not process your request")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MarqueeError {
    /// Wrap an unexpected fault, logging the detail so it never crosses the boundary
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let detail = detail.to_string();
        error!("Internal error: {}", detail);
        Self::Internal(detail)
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::DuplicateEmail => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for the presentation layer
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<rusqlite::Error> for MarqueeError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            // Raised when a statement is aborted at its deadline
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::Timeout("interrupted")
            }
            other => Self::internal(format!("Database error: {}", other)),
        }
    }
}

impl From<serde_json::Error> for MarqueeError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for MarqueeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Blocking task failed: {}", err))
    }
}

/// Result type alias for Marquee operations
pub type Result<T> = std::result::Result<T, MarqueeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_and_authorization_are_distinct() {
        assert_eq!(
            MarqueeError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            MarqueeError::InvalidOrExpiredToken.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            MarqueeError::Unauthorized("not permitted".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_internal_detail_not_rendered() {
        let err = MarqueeError::internal("disk I/O error at page 42");
        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("page 42"));
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: MarqueeError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, MarqueeError::NotFound));
    }

    #[test]
    fn test_interrupted_statement_maps_to_timeout() {
        let err: MarqueeError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        )
        .into();
        assert!(matches!(err, MarqueeError::Timeout(_)));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
