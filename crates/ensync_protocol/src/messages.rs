//! Wire messages for the four sync target operations.
//!
//! Every message is a serde struct encoded as CBOR. The same types travel
//! over HTTP and through in-process targets, so a target implementation
//! never has to care which transport delivered a request.

use crate::envelope::EncryptedEnvelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{DocId, Generation, ReplicaId, TransactionId};
use crate::revision::{Lineage, Revision};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// CBOR encoding shared by all wire messages.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes the message to CBOR bytes.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a message from CBOR bytes.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Result of applying a document to a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutOutcome {
    /// The document now has a single leaf.
    Applied,
    /// Every incoming revision was already known; nothing changed.
    Unchanged,
    /// The document now has more than one leaf.
    Conflicted,
}

/// One leaf of a document as it travels to or from a remote replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLeaf {
    /// Revision and its ancestry.
    pub lineage: Lineage,
    /// Encrypted content; `None` for a deletion tombstone.
    pub envelope: Option<EncryptedEnvelope>,
}

/// A document with every leaf the sender holds for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDocument {
    /// Document id.
    pub doc_id: DocId,
    /// The sender's current leaf.
    pub current: WireLeaf,
    /// Additional conflicting leaves held by the sender.
    pub conflicts: Vec<WireLeaf>,
}

impl WireDocument {
    /// Iterates over the current leaf followed by the conflicts.
    pub fn leaves(&self) -> impl Iterator<Item = &WireLeaf> {
        std::iter::once(&self.current).chain(self.conflicts.iter())
    }

    /// Consumes the document into its leaves, current first.
    pub fn into_leaves(self) -> Vec<WireLeaf> {
        let mut leaves = Vec::with_capacity(1 + self.conflicts.len());
        leaves.push(self.current);
        leaves.extend(self.conflicts);
        leaves
    }

    /// Returns the set of leaf revisions.
    pub fn revisions(&self) -> BTreeSet<Revision> {
        self.leaves().map(|leaf| leaf.lineage.head).collect()
    }
}

/// Request for the target's generation and its knowledge of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfoRequest {
    /// Replica asking.
    pub source_replica: ReplicaId,
    /// Create the target replica if it does not exist yet.
    pub ensure: bool,
    /// If set, the target reports its transaction id at this generation.
    pub checked_generation: Option<Generation>,
}

impl SyncInfoRequest {
    /// Creates a plain sync info request.
    pub fn new(source_replica: ReplicaId, ensure: bool) -> Self {
        Self {
            source_replica,
            ensure,
            checked_generation: None,
        }
    }

    /// Asks the target for its transaction id at `generation`.
    pub fn checking(mut self, generation: Generation) -> Self {
        self.checked_generation = Some(generation);
        self
    }
}

/// The target's answer to [`SyncInfoRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Target replica id.
    pub target_replica: ReplicaId,
    /// Target's current generation.
    pub target_generation: Generation,
    /// Target's transaction id at its current generation.
    pub target_transaction_id: TransactionId,
    /// Target's transaction id at the checked generation, if one was requested
    /// and the target's log reaches that far.
    pub checked_transaction_id: Option<TransactionId>,
    /// Highest source generation the target has recorded.
    pub source_generation: Generation,
    /// Source transaction id recorded alongside `source_generation`.
    pub source_transaction_id: TransactionId,
}

/// Pushes one document to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDocumentRequest {
    /// Replica sending the document.
    pub source_replica: ReplicaId,
    /// The document and all of its leaves.
    pub document: WireDocument,
    /// Source generation at which the document last changed.
    pub source_generation: Generation,
    /// Source transaction id at `source_generation`.
    pub source_transaction_id: TransactionId,
}

/// The target's answer to [`SendDocumentRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDocumentResponse {
    /// What happened to the document on the target.
    pub outcome: PutOutcome,
    /// Target generation after the write.
    pub target_generation: Generation,
    /// Target transaction id after the write.
    pub target_transaction_id: TransactionId,
}

/// Requests the target's changes after a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChangesRequest {
    /// Replica asking.
    pub source_replica: ReplicaId,
    /// Only changes strictly after this generation are returned.
    pub since: Generation,
    /// Maximum number of changes in the response.
    pub limit: u32,
}

impl GetChangesRequest {
    /// Creates a new changes request.
    pub fn new(source_replica: ReplicaId, since: Generation, limit: u32) -> Self {
        Self {
            source_replica,
            since,
            limit,
        }
    }
}

/// One changed document on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Target generation of the document's latest change.
    pub generation: Generation,
    /// Target transaction id at `generation`.
    pub transaction_id: TransactionId,
    /// The document as the target holds it now.
    pub document: WireDocument,
}

/// The target's answer to [`GetChangesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changes in ascending generation order.
    pub changes: Vec<RemoteChange>,
    /// Target generation when the response was built.
    pub target_generation: Generation,
    /// Target transaction id at `target_generation`.
    pub target_transaction_id: TransactionId,
    /// True if the limit cut the response short.
    pub has_more: bool,
}

/// Tells the target how far it is known by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCheckpointRequest {
    /// Replica whose progress is recorded.
    pub source_replica: ReplicaId,
    /// Source generation the target now reflects.
    pub generation: Generation,
    /// Source transaction id at `generation`.
    pub transaction_id: TransactionId,
}

/// The target's answer to [`RecordCheckpointRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCheckpointResponse {
    /// False if the target already knew a later generation.
    pub recorded: bool,
}

impl WireMessage for SyncInfoRequest {}
impl WireMessage for SyncInfo {}
impl WireMessage for SendDocumentRequest {}
impl WireMessage for SendDocumentResponse {}
impl WireMessage for GetChangesRequest {}
impl WireMessage for ChangesResponse {}
impl WireMessage for RecordCheckpointRequest {}
impl WireMessage for RecordCheckpointResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeScheme;

    fn leaf(byte: u8, encrypted: bool) -> WireLeaf {
        WireLeaf {
            lineage: Lineage::root(&[byte; 32], !encrypted),
            envelope: encrypted.then(|| EncryptedEnvelope {
                scheme: EnvelopeScheme::Aes256GcmHmacSha256,
                nonce: vec![byte; 12],
                ciphertext: vec![0xAB; 40],
                mac: vec![0xCD; 32],
            }),
        }
    }

    #[test]
    fn sync_info_request_builder() {
        let request = SyncInfoRequest::new(ReplicaId::new("a"), true).checking(Generation(5));
        assert!(request.ensure);
        assert_eq!(request.checked_generation, Some(Generation(5)));

        let decoded = SyncInfoRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn send_document_carries_all_leaves() {
        let request = SendDocumentRequest {
            source_replica: ReplicaId::new("source"),
            document: WireDocument {
                doc_id: DocId::new("doc-1"),
                current: leaf(1, true),
                conflicts: vec![leaf(2, true), leaf(3, false)],
            },
            source_generation: Generation(7),
            source_transaction_id: TransactionId::new("T-7"),
        };

        let decoded = SendDocumentRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.document.revisions().len(), 3);
        assert!(decoded.document.conflicts[1].envelope.is_none());
        assert_eq!(decoded, request);
    }

    #[test]
    fn envelope_bytes_are_byte_strings() {
        let envelope = leaf(4, true).envelope.unwrap();
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&envelope, &mut buf).unwrap();
        // 40 bytes of ciphertext encode as a 2-byte header plus the payload.
        assert!(buf.windows(2).any(|w| w == [0x58, 40]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            ChangesResponse::decode(&[0xFF, 0x00, 0x13]),
            Err(ProtocolError::Decode(_))
        ));
    }
}
