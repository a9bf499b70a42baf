use thiserror::Error;

/// Error taxonomy shared by HTTP handlers and WebSocket handlers.
///
/// The variant decides how the failure surfaces (HTTP status or event
/// type); the payload is the human-readable message sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinichatError {
    /// Missing, unknown or expired session token.
    #[error("{0}")]
    Auth(String),

    /// Referenced user, conversation, call or post does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Actor lacks the role the operation requires.
    #[error("{0}")]
    Permission(String),

    /// Malformed or out-of-range request payload.
    #[error("{0}")]
    Validation(String),

    /// Call setup failure, reported as `call_error`.
    #[error("{0}")]
    Call(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),
}

impl MinichatError {
    pub fn unauthorized() -> Self {
        Self::Auth("Unauthorized".into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MinichatError>;
