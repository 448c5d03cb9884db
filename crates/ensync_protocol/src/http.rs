//! HTTP contract between the HTTP sync target and the sync server.
//!
//! Every operation is a `POST` to `/replicas/<name>/<endpoint>` with a CBOR
//! body. Failures come back as an [`ErrorResponse`] with a non-200 status.
//! The server side implements [`RequestDispatch`]; any HTTP front-end (or
//! the in-process loopback client) only needs to forward path, credentials
//! and body.

use crate::messages::WireMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Endpoint for `get_sync_info`.
pub const SYNC_INFO: &str = "sync-info";
/// Endpoint for `send_document`.
pub const DOCUMENTS: &str = "documents";
/// Endpoint for `get_changes`.
pub const CHANGES: &str = "changes";
/// Endpoint for `record_checkpoint`.
pub const CHECKPOINT: &str = "checkpoint";

const REPLICAS_PREFIX: &str = "/replicas/";

/// Builds the request path for an endpoint of a named replica.
pub fn replica_path(replica: &str, endpoint: &str) -> String {
    format!("{REPLICAS_PREFIX}{replica}/{endpoint}")
}

/// Splits a request path into `(replica name, endpoint)`.
///
/// Anything before `/replicas/` (scheme, host, mount prefix) is ignored.
pub fn parse_replica_path(path: &str) -> Option<(&str, &str)> {
    let start = path.find(REPLICAS_PREFIX)? + REPLICAS_PREFIX.len();
    let (replica, endpoint) = path[start..].split_once('/')?;
    if replica.is_empty() || endpoint.is_empty() || endpoint.contains('/') {
        return None;
    }
    Some((replica, endpoint))
}

/// Credentials attached to requests by an HTTP client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authenticated user id.
    pub user_id: String,
    /// Token issued for `user_id`.
    pub token: Vec<u8>,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(user_id: impl Into<String>, token: Vec<u8>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// CBOR response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response carrying `body`.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// An error response; the body is the encoded [`ErrorResponse`].
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        let error = ErrorResponse {
            kind,
            message: message.into(),
        };
        // An ErrorResponse is two plain fields; encoding cannot fail in practice,
        // and an empty body still carries the status.
        let body = error.encode().unwrap_or_default();
        Self {
            status: kind.status(),
            body,
        }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request could not be decoded or was malformed.
    InvalidRequest,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Valid credentials without access to the replica.
    Forbidden,
    /// The named replica does not exist.
    ReplicaNotFound,
    /// The server failed while handling a valid request.
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::ReplicaNotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

/// Body of a non-200 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub kind: ErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl WireMessage for ErrorResponse {}

/// Server side of the HTTP contract.
pub trait RequestDispatch: Send + Sync {
    /// Handles a `POST` to `path` and returns the response.
    fn dispatch(&self, path: &str, credentials: Option<&Credentials>, body: &[u8])
        -> HttpResponse;
}

impl<T: RequestDispatch + ?Sized> RequestDispatch for Arc<T> {
    fn dispatch(
        &self,
        path: &str,
        credentials: Option<&Credentials>,
        body: &[u8],
    ) -> HttpResponse {
        (**self).dispatch(path, credentials, body)
    }
}
