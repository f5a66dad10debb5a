use thiserror::Error;

use crate::utils::format_minutes;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Username and password required")]
    MissingCredentials,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid username or password. {remaining_attempts} attempt(s) remaining")]
    InvalidCredentials { remaining_attempts: u32 },

    #[error(
        "Account locked due to too many failed attempts. Try again in {}",
        format_minutes(*minutes_remaining)
    )]
    AccountLocked { minutes_remaining: i64 },

    #[error("Unable to reach the authentication server: {0}")]
    Network(String),

    #[error("Session expired or revoked - please log in again")]
    SessionRevoked,
}

impl AuthError {
    /// Whether the user may immediately try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::InvalidCredentials { .. } | AuthError::Network(_))
    }
}

/// Failure reported by an authentication backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend answered and refused the credentials
    #[error("Credentials rejected: {message}")]
    Rejected {
        message: String,
        remaining_attempts: Option<u32>,
    },

    /// The call could not complete (transport failure, timeout, 5xx)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
