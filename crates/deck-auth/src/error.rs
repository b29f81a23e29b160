//! Authentication errors.

use deck_store::StoreError;
use http::StatusCode;
use thiserror::Error;

/// Authentication error type.
///
/// Every variant maps to one HTTP status and one stable public message.
/// Details carried by [`AuthError::StoreUnavailable`] and
/// [`AuthError::Internal`] are for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong email or password. Never says which.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration with an email that is already bound.
    #[error("email already registered")]
    DuplicateEmail,

    /// Token missing, malformed, expired, or badly signed.
    #[error("token invalid or expired")]
    TokenInvalid,

    /// No usable identity on a protected operation.
    #[error("authentication required")]
    Unauthorized,

    /// Valid identity without a required role.
    #[error("insufficient permissions")]
    Forbidden,

    /// Unknown user or session id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backing store unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Check if this is an authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::TokenInvalid | AuthError::Unauthorized
        )
    }

    /// Check if this is a permission error.
    pub fn is_permission_error(&self) -> bool {
        matches!(self, AuthError::Forbidden)
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::TokenInvalid | AuthError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::DuplicateEmail | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a client.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::DuplicateEmail => "User with this email already exists".to_string(),
            AuthError::TokenInvalid => "Invalid or expired token".to_string(),
            AuthError::Unauthorized => "Authentication required".to_string(),
            AuthError::Forbidden => "Insufficient permissions".to_string(),
            AuthError::NotFound(what) => format!("{} not found", what),
            AuthError::InvalidRequest(reason) => reason.clone(),
            AuthError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => AuthError::StoreUnavailable(reason),
            corrupt @ StoreError::Corrupt { .. } => AuthError::Internal(corrupt.to_string()),
        }
    }
}

/// Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
