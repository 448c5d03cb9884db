//! Error types for the sync engine.

use ensync_core::CoreError;
use ensync_protocol::{DocId, ProtocolError, ReplicaId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync round.
///
/// A conflict is not an error: it is a normal outcome reported in
/// [`SyncReport::conflicts`](crate::SyncReport).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the round can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server failed while handling the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The target replica does not exist and was not created.
    #[error("replica not found: {0}")]
    ReplicaNotFound(String),

    /// A replica was rebuilt or rolled back since the last sync.
    ///
    /// Not recoverable by retrying; the caller decides whether to reset the
    /// checkpoint and start over from generation zero.
    #[error("replica divergence with {target}: {detail}")]
    ReplicaDivergence {
        /// Target replica of the round.
        target: ReplicaId,
        /// What did not match.
        detail: String,
    },

    /// An envelope failed authentication during pull.
    #[error("integrity check failed for {doc_id}: {message}")]
    Integrity {
        /// Document whose envelope was rejected.
        doc_id: DocId,
        /// What failed.
        message: String,
    },

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(CoreError),

    /// The round was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("sync cancelled")]
    Cancelled,

    /// Another round on the same replica pair is running.
    #[error("sync already in progress between {local} and {target}")]
    SyncInProgress {
        /// Local replica.
        local: ReplicaId,
        /// Target replica.
        target: ReplicaId,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a divergence error.
    pub fn divergence(target: &ReplicaId, detail: impl Into<String>) -> Self {
        Self::ReplicaDivergence {
            target: target.clone(),
            detail: detail.into(),
        }
    }

    /// Returns true if retrying the whole round may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            SyncError::SyncInProgress { .. } => true,
            _ => false,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Integrity { doc_id, message } => SyncError::Integrity { doc_id, message },
            other => SyncError::Storage(other),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
