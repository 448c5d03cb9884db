//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or parsing protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A revision string could not be parsed.
    #[error("invalid revision '{0}'")]
    InvalidRevision(String),
}
