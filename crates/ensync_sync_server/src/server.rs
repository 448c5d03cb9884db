//! Main sync server.

use crate::auth::{replica_allowed, AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::registry::ReplicaRegistry;
use ensync_protocol::http::{self, Credentials, HttpResponse, RequestDispatch};
use ensync_protocol::{
    ChangesResponse, GetChangesRequest, RecordCheckpointRequest, RecordCheckpointResponse,
    SendDocumentRequest, SendDocumentResponse, SyncInfo, SyncInfoRequest, WireMessage,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// The sync server.
///
/// Hosts named replicas of encrypted documents and answers the four sync
/// target operations for them. [`dispatch`](RequestDispatch::dispatch)
/// implements the HTTP contract, so any HTTP front-end only has to forward
/// the path, the credentials and the body.
///
/// # Example
///
/// ```
/// use ensync_protocol::{ReplicaId, SyncInfoRequest};
/// use ensync_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let request = SyncInfoRequest::new(ReplicaId::new("laptop"), true);
/// let info = server.handle_sync_info("notes", &request).unwrap();
/// assert_eq!(info.target_generation.value(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a new sync server.
    ///
    /// Replicas live under `config.data_dir` if set, in memory otherwise.
    pub fn new(config: ServerConfig) -> Self {
        let registry = match &config.data_dir {
            Some(dir) => ReplicaRegistry::open(dir, config.sync_on_commit),
            None => ReplicaRegistry::in_memory(),
        };
        Self::with_registry(config, Arc::new(registry))
    }

    /// Creates a sync server over an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<ReplicaRegistry>) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            (None, true) => {
                warn!("require_auth is set without an auth secret; every request will be refused");
                None
            }
            _ => None,
        };
        let context = Arc::new(HandlerContext::new(config, registry));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            validator,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the replica registry.
    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.context.registry
    }

    /// Issues a token for `user_id`.
    pub fn create_token(&self, user_id: &str) -> ServerResult<Vec<u8>> {
        self.validator
            .as_ref()
            .ok_or_else(|| ServerError::InvalidRequest("authentication is not enabled".into()))?
            .create_token(user_id)
    }

    /// Handles `get_sync_info` for the replica `name`.
    pub fn handle_sync_info(&self, name: &str, request: &SyncInfoRequest) -> ServerResult<SyncInfo> {
        self.handler.handle_sync_info(name, request)
    }

    /// Handles `send_document` for the replica `name`.
    pub fn handle_send_document(
        &self,
        name: &str,
        request: SendDocumentRequest,
    ) -> ServerResult<SendDocumentResponse> {
        self.handler.handle_send_document(name, request)
    }

    /// Handles `get_changes` for the replica `name`.
    pub fn handle_get_changes(
        &self,
        name: &str,
        request: &GetChangesRequest,
    ) -> ServerResult<ChangesResponse> {
        self.handler.handle_get_changes(name, request)
    }

    /// Handles `record_checkpoint` for the replica `name`.
    pub fn handle_record_checkpoint(
        &self,
        name: &str,
        request: &RecordCheckpointRequest,
    ) -> ServerResult<RecordCheckpointResponse> {
        self.handler.handle_record_checkpoint(name, request)
    }

    fn authorize(&self, name: &str, credentials: Option<&Credentials>) -> ServerResult<()> {
        let Some(validator) = &self.validator else {
            if self.context.config.require_auth {
                return Err(ServerError::Internal(
                    "authentication is required but no auth secret is configured".into(),
                ));
            }
            return Ok(());
        };
        let credentials = credentials
            .ok_or_else(|| ServerError::AuthenticationFailed("missing credentials".into()))?;
        validator.validate_token(&credentials.token, &credentials.user_id)?;
        if !replica_allowed(&credentials.user_id, name) {
            return Err(ServerError::NotAuthorized(format!(
                "user {} may not access replica {name}",
                credentials.user_id
            )));
        }
        Ok(())
    }

    fn route(
        &self,
        path: &str,
        credentials: Option<&Credentials>,
        body: &[u8],
    ) -> ServerResult<Vec<u8>> {
        let (name, endpoint) = http::parse_replica_path(path)
            .ok_or_else(|| ServerError::InvalidRequest(format!("no route for {path}")))?;
        self.authorize(name, credentials)?;

        match endpoint {
            http::SYNC_INFO => encode(&self.handle_sync_info(name, &decode(body)?)?),
            http::DOCUMENTS => encode(&self.handle_send_document(name, decode(body)?)?),
            http::CHANGES => encode(&self.handle_get_changes(name, &decode(body)?)?),
            http::CHECKPOINT => encode(&self.handle_record_checkpoint(name, &decode(body)?)?),
            other => Err(ServerError::InvalidRequest(format!(
                "unknown endpoint: {other}"
            ))),
        }
    }
}

fn decode<T: WireMessage>(body: &[u8]) -> ServerResult<T> {
    T::decode(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn encode<T: WireMessage>(message: &T) -> ServerResult<Vec<u8>> {
    message
        .encode()
        .map_err(|e| ServerError::Internal(e.to_string()))
}

impl RequestDispatch for SyncServer {
    fn dispatch(
        &self,
        path: &str,
        credentials: Option<&Credentials>,
        body: &[u8],
    ) -> HttpResponse {
        match self.route(path, credentials, body) {
            Ok(body) => HttpResponse::ok(body),
            Err(e) => {
                if e.is_server_error() {
                    warn!(path, error = %e, "request failed");
                } else {
                    debug!(path, error = %e, "request rejected");
                }
                HttpResponse::error(e.kind(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensync_protocol::http::{ErrorKind, ErrorResponse};
    use ensync_protocol::{Generation, ReplicaId};

    fn hello(ensure: bool) -> Vec<u8> {
        SyncInfoRequest::new(ReplicaId::new("laptop"), ensure)
            .encode()
            .unwrap()
    }

    fn error_kind(response: &HttpResponse) -> ErrorKind {
        ErrorResponse::decode(&response.body).unwrap().kind
    }

    #[test]
    fn dispatch_routes_sync_info() {
        let server = SyncServer::new(ServerConfig::default());
        let response = server.dispatch("/replicas/notes/sync-info", None, &hello(true));
        assert!(response.is_success());

        let info = SyncInfo::decode(&response.body).unwrap();
        assert_eq!(info.target_generation, Generation::ZERO);
        assert_eq!(server.registry().names(), vec!["notes".to_string()]);
    }

    #[test]
    fn dispatch_reports_errors_with_status() {
        let server = SyncServer::new(ServerConfig::default());

        let response = server.dispatch("/replicas/notes/sync-info", None, &hello(false));
        assert_eq!(response.status, 404);
        assert_eq!(error_kind(&response), ErrorKind::ReplicaNotFound);

        let response = server.dispatch("/replicas/notes/sync-info", None, b"not cbor");
        assert_eq!(response.status, 400);

        let response = server.dispatch("/replicas/notes/unknown", None, &hello(true));
        assert_eq!(response.status, 400);

        let response = server.dispatch("/elsewhere", None, &hello(true));
        assert_eq!(response.status, 400);
    }

    #[test]
    fn auth_required_when_enabled() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"server-secret".to_vec()));
        let path = "/replicas/user-alice/sync-info";

        let response = server.dispatch(path, None, &hello(true));
        assert_eq!(response.status, 401);

        let forged = Credentials::new("alice", b"forged".to_vec());
        let response = server.dispatch(path, Some(&forged), &hello(true));
        assert_eq!(response.status, 401);

        let token = server.create_token("alice").unwrap();
        let alice = Credentials::new("alice", token);
        let response = server.dispatch(path, Some(&alice), &hello(true));
        assert!(response.is_success());

        let response = server.dispatch("/replicas/user-bob/sync-info", Some(&alice), &hello(true));
        assert_eq!(response.status, 403);
        assert_eq!(error_kind(&response), ErrorKind::Forbidden);
    }

    #[test]
    fn auth_without_secret_refuses_everything() {
        let config = ServerConfig {
            require_auth: true,
            auth_secret: None,
            ..ServerConfig::default()
        };
        let server = SyncServer::with_registry(config, Arc::new(ReplicaRegistry::in_memory()));

        let response = server.dispatch("/replicas/user-victim/sync-info", None, &hello(true));
        assert_eq!(response.status, 500);
        assert_eq!(error_kind(&response), ErrorKind::Internal);

        let guess = Credentials::new("victim", b"anything".to_vec());
        let response = server.dispatch("/replicas/user-victim/sync-info", Some(&guess), &hello(true));
        assert!(!response.is_success());
        assert!(server.registry().names().is_empty());
        assert!(server.create_token("victim").is_err());
    }

    #[test]
    fn dashed_user_cannot_reach_prefix_replicas() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"server-secret".to_vec()));
        assert!(server.create_token("alice-bob").is_err());

        let alice = Credentials::new("alice", server.create_token("alice").unwrap());
        let response = server.dispatch("/replicas/user-alice-bob/sync-info", Some(&alice), &hello(true));
        assert!(response.is_success());

        let bob = Credentials::new("bob", server.create_token("bob").unwrap());
        let response = server.dispatch("/replicas/user-alice-bob/sync-info", Some(&bob), &hello(true));
        assert_eq!(response.status, 403);
    }

    #[test]
    fn tokens_need_auth_enabled() {
        let server = SyncServer::new(ServerConfig::default());
        assert!(server.create_token("alice").is_err());
    }
}
