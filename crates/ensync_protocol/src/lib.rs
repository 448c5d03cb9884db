//! # ensync Protocol
//!
//! Shared vocabulary between a local replica and a sync target.
//!
//! This crate provides:
//! - Replica, document, generation and transaction identifiers
//! - Revision lineage and its partial order (`Lineage::compare`)
//! - The encrypted envelope stored by remote replicas
//! - CBOR wire messages for the four sync target operations
//! - The HTTP routing contract used by the HTTP target and the server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
pub mod http;
mod ids;
mod messages;
mod revision;

pub use envelope::{EncryptedEnvelope, EnvelopeScheme};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{DocId, Generation, ReplicaId, TransactionId};
pub use messages::{
    ChangesResponse, GetChangesRequest, PutOutcome, RecordCheckpointRequest,
    RecordCheckpointResponse, RemoteChange, SendDocumentRequest, SendDocumentResponse, SyncInfo,
    SyncInfoRequest, WireDocument, WireLeaf, WireMessage,
};
pub use revision::{Lineage, Revision, RevisionOrder};
