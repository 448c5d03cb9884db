//! # ensync Sync Server
//!
//! Remote side of ensync: hosts encrypted replicas for sync targets.
//!
//! This crate provides:
//! - A registry of named replicas, in memory or under a data directory
//! - Handlers for the four sync target operations
//! - Authentication (HMAC-SHA256 tokens) and per-user replica access
//! - Dispatch of the HTTP contract for any HTTP front-end
//!
//! # Architecture
//!
//! Hosted replicas are the same document store clients use, instantiated
//! over encrypted envelopes. The server never holds key material, so it
//! can order, merge and serve documents but never read them. For every
//! source replica it remembers how far it knows that source.
//!
//! # Authentication
//!
//! Authentication is optional but recommended for production:
//!
//! ```rust,ignore
//! use ensync_sync_server::{ServerConfig, SyncServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret));
//!
//! // Hand this token to the user's HTTP client.
//! let token = server.create_token("42")?;
//! // The user may now sync `user-42` and `user-42-*` replicas.
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod registry;
mod server;

pub use auth::{replica_allowed, AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use registry::{validate_replica_name, HostedReplica, RemoteReplica, ReplicaRegistry};
pub use server::SyncServer;
