// ================================================================
// File: supportbot-common/src/error.rs
// ================================================================

use thiserror::Error;

use crate::models::session::TicketState;

/// Rejections raised locally by the session registry and the ticket state
/// machine. The stored session is never touched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("session {0} is closed and can no longer be modified")]
    SessionClosed(String),

    #[error("illegal ticket transition {from} -> {to}")]
    IllegalTransition { from: TicketState, to: TicketState },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("unknown product '{0}'")]
    UnknownProduct(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl Error {
    /// Store and transport failures that are worth another attempt.
    /// Validation and permission errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExternalService(_)
                | Error::Database(_)
                | Error::Http(_)
                | Error::Io(_)
                | Error::Timeout(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::ExternalService(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::ExternalService(s.to_string())
    }
}
