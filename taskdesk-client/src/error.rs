use thiserror::Error;

/// Errors returned by [`crate::SessionClient`].
///
/// Cloneable so that a single refresh failure can be handed to every request
/// that was parked behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Failed to call {call}: {message}")]
    Transport { call: String, message: String },

    #[error("{call} returned {status}")]
    Status {
        call: String,
        status: u16,
        body: String,
    },

    #[error("{call} was rejected as unauthorized")]
    Unauthorized { call: String },

    #[error("Session refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Session was logged out")]
    LoggedOut,

    #[error("Failed to parse {call} response: {message}")]
    Decode { call: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// True when the caller has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized { .. } | ClientError::RefreshFailed(_) | ClientError::LoggedOut
        )
    }

    /// HTTP status carried by the error, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}
