//! Error types for ensync core.

use ensync_protocol::{DocId, Revision};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in document store, checkpoint store and crypto operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// JSON encoding or decoding of document content failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The journal contains records that cannot be replayed.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Document does not exist.
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// The missing document.
        doc_id: DocId,
    },

    /// Document already exists and is not deleted.
    #[error("document already exists: {doc_id}")]
    DocumentExists {
        /// The existing document.
        doc_id: DocId,
    },

    /// Document is already deleted.
    #[error("document already deleted: {doc_id}")]
    AlreadyDeleted {
        /// The deleted document.
        doc_id: DocId,
    },

    /// A local edit named a parent revision that is not the current one.
    #[error("revision mismatch on {doc_id}: expected {expected}, found {actual}")]
    RevisionMismatch {
        /// Document being edited.
        doc_id: DocId,
        /// Parent revision given by the caller.
        expected: Revision,
        /// Current revision in the store.
        actual: Revision,
    },

    /// The document has conflicts that must be resolved before editing it.
    #[error("document has unresolved conflicts: {doc_id}")]
    DocumentConflicted {
        /// The conflicted document.
        doc_id: DocId,
    },

    /// Conflict resolution was requested for a document without conflicts.
    #[error("document has no conflicts: {doc_id}")]
    NotConflicted {
        /// The document.
        doc_id: DocId,
    },

    /// The revision is not a leaf of the document.
    #[error("revision {revision} is not a leaf of {doc_id}")]
    UnknownRevision {
        /// The document.
        doc_id: DocId,
        /// The unknown revision.
        revision: Revision,
    },

    /// Ciphertext failed authentication.
    #[error("integrity check failed for {doc_id}: {message}")]
    Integrity {
        /// Document whose envelope was rejected.
        doc_id: DocId,
        /// What failed.
        message: String,
    },

    /// Key material of the wrong size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Actual key size provided.
        actual: usize,
        /// Expected key size.
        expected: usize,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Replica directory is locked by another process.
    #[error("replica locked: another process has exclusive access")]
    ReplicaLocked,

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an integrity error for a document.
    pub fn integrity(doc_id: &DocId, message: impl Into<String>) -> Self {
        Self::Integrity {
            doc_id: doc_id.clone(),
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { actual, expected }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true if the error stems from the storage medium rather than
    /// from the caller's request.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Io(_)
                | CoreError::Codec { .. }
                | CoreError::JournalCorruption { .. }
                | CoreError::ReplicaLocked
                | CoreError::InvalidFormat { .. }
        )
    }
}
