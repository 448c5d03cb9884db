//! Error types for the sync server.

use ensync_core::CoreError;
use ensync_protocol::http::ErrorKind;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Valid credentials without access to the replica.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The named replica does not exist.
    #[error("replica not found: {0}")]
    ReplicaNotFound(String),

    /// Storage error in a hosted replica.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the error kind sent to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServerError::AuthenticationFailed(_) => ErrorKind::Unauthorized,
            ServerError::NotAuthorized(_) => ErrorKind::Forbidden,
            ServerError::ReplicaNotFound(_) => ErrorKind::ReplicaNotFound,
            ServerError::Storage(_) | ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.kind().status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.kind().status() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Storage(CoreError::ReplicaLocked).is_server_error());
    }

    #[test]
    fn kinds_match_statuses() {
        assert_eq!(
            ServerError::AuthenticationFailed("no token".into()).kind().status(),
            401
        );
        assert_eq!(ServerError::NotAuthorized("user-2".into()).kind().status(), 403);
        assert_eq!(ServerError::ReplicaNotFound("notes".into()).kind().status(), 404);
    }
}
