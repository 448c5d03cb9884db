//! HTTP sync target.
//!
//! This module maps the four target operations onto the HTTP contract in
//! [`ensync_protocol::http`]. The actual HTTP client is abstracted via a
//! trait so any HTTP library (reqwest, hyper, ureq, ...) can carry the bytes;
//! the client also owns the credentials, which never reach the synchronizer.

use crate::error::{SyncError, SyncResult};
use crate::target::SyncTarget;
use ensync_protocol::http::{
    self, Credentials, ErrorKind, ErrorResponse, HttpResponse, RequestDispatch,
};
use ensync_protocol::{
    ChangesResponse, GetChangesRequest, RecordCheckpointRequest, RecordCheckpointResponse,
    SendDocumentRequest, SendDocumentResponse, SyncInfo, SyncInfoRequest, WireMessage,
};
use parking_lot::RwLock;
use tracing::warn;

/// HTTP client abstraction.
///
/// `Err` means no response was received (connection refused, reset, timed
/// out); any response that arrived, including error statuses, is `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a CBOR body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;
}

/// Sync target reached over HTTP.
pub struct HttpSyncTarget<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// Name of the remote replica.
    replica: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpSyncTarget<C> {
    /// Creates a target for the replica `replica` on the server at `base_url`.
    pub fn new(base_url: impl Into<String>, replica: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            replica: replica.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the remote replica name.
    pub fn replica(&self) -> &str {
        &self.replica
    }

    /// Returns the URL of an endpoint of the remote replica.
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            http::replica_path(&self.replica, endpoint)
        )
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage,
        Res: WireMessage,
    {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = self.url(endpoint);
        let response = self.client.post(&url, body).map_err(|e| {
            warn!(url = %url, error = %e, "sync request failed");
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        if !response.is_success() {
            return Err(status_error(&response));
        }

        Res::decode(&response.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

/// Maps a non-success response onto a sync error.
fn status_error(response: &HttpResponse) -> SyncError {
    let message = ErrorResponse::decode(&response.body)
        .map(|error| error.message)
        .unwrap_or_else(|_| format!("HTTP {}", response.status));

    match response.status {
        401 | 403 => SyncError::AuthenticationFailed(message),
        404 => SyncError::ReplicaNotFound(message),
        400 => SyncError::Protocol(message),
        500..=599 => SyncError::ServerError(message),
        _ => SyncError::transport_fatal(format!("HTTP {}: {message}", response.status)),
    }
}

impl<C: HttpClient> SyncTarget for HttpSyncTarget<C> {
    fn get_sync_info(&self, request: &SyncInfoRequest) -> SyncResult<SyncInfo> {
        self.post_cbor(http::SYNC_INFO, request)
    }

    fn send_document(&self, request: &SendDocumentRequest) -> SyncResult<SendDocumentResponse> {
        self.post_cbor(http::DOCUMENTS, request)
    }

    fn get_changes(&self, request: &GetChangesRequest) -> SyncResult<ChangesResponse> {
        self.post_cbor(http::CHANGES, request)
    }

    fn record_checkpoint(
        &self,
        request: &RecordCheckpointRequest,
    ) -> SyncResult<RecordCheckpointResponse> {
        self.post_cbor(http::CHECKPOINT, request)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for tests and for syncing against a server data directory on the
/// same machine without network overhead.
pub struct LoopbackClient<S: RequestDispatch> {
    server: S,
    credentials: Option<Credentials>,
}

impl<S: RequestDispatch> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            credentials: None,
        }
    }

    /// Attaches credentials to every request.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Returns the server this client talks to.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: RequestDispatch> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        if http::parse_replica_path(url).is_none() {
            return Ok(HttpResponse::error(
                ErrorKind::InvalidRequest,
                format!("no route for {url}"),
            ));
        }
        Ok(self
            .server
            .dispatch(url, self.credentials.as_ref(), &body))
    }
}
