use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Why a borrow request was rejected. Distinct for logs and callers inside the
/// crate; collapsed into one generic client message by `IntoResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowDenied {
    LimitExceeded,
    NoCopiesAvailable,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    /// Bad credentials on login. The message never reveals whether the
    /// username or the password was wrong.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Missing, malformed, expired or revoked session token.
    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Cannot borrow this book. Check availability or your borrowing limit.")]
    CannotBorrow(BorrowDenied),

    #[error("This book has already been returned")]
    AlreadyReturned,

    #[error("Renewal limit reached for this loan")]
    RenewalLimitExceeded,

    #[error("Overdue loans cannot be renewed")]
    Overdue,

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(anyhow::Error::new(e).context("database error"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Duplicate username renders as 400, matching the signup contract.
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::InvalidSession => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CannotBorrow(_)
            | AppError::AlreadyReturned
            | AppError::RenewalLimitExceeded
            | AppError::Overdue => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Internal(source) => {
                // Full detail stays in the logs; the client gets a generic body.
                tracing::error!(error = ?source, "internal server error");
            }
            AppError::CannotBorrow(reason) => {
                tracing::warn!(?reason, "borrow rejected");
            }
            _ => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
