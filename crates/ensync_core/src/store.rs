//! The document store contract consumed by the synchronizer.

use crate::crypto::RevisionKey;
use crate::document::{ChangeRecord, Content, Document, Leaf, Payload, PutResult};
use crate::error::CoreResult;
use crate::replica::Replica;
use ensync_protocol::{DocId, Generation, ReplicaId, Revision, TransactionId};

/// Operations a replica's storage must support to take part in sync.
///
/// [`Replica`] is the implementation shipped with this crate; the trait
/// exists so the synchronizer can be tested against doubles and run over
/// other storage engines.
pub trait DocumentStore<P: Payload = Content>: Send + Sync {
    /// Stable id of this replica.
    fn replica_id(&self) -> ReplicaId;

    /// Current generation and its transaction id.
    fn current_generation(&self) -> CoreResult<(Generation, TransactionId)>;

    /// Transaction id at `generation`, `None` if the log does not reach it.
    fn transaction_id_at(&self, generation: Generation) -> CoreResult<Option<TransactionId>>;

    /// Current state of a document.
    fn get(&self, doc_id: &DocId) -> CoreResult<Option<Document<P>>>;

    /// Every leaf of a document, current first.
    fn leaves(&self, doc_id: &DocId) -> CoreResult<Vec<Leaf<P>>>;

    /// Applies revisions from another replica. Idempotent.
    fn put(&self, doc_id: &DocId, leaves: Vec<Leaf<P>>) -> CoreResult<PutResult>;

    /// Documents changed strictly after `generation`, ascending.
    fn changes_since(&self, generation: Generation) -> CoreResult<Vec<ChangeRecord>>;

    /// Collapses a conflicted document onto one of its leaves.
    fn resolve_conflict(&self, doc_id: &DocId, chosen: &Revision) -> CoreResult<Document<P>>;

    /// Keys the content digests of revisions minted from now on.
    fn set_revision_key(&self, key: RevisionKey);
}

impl<P: Payload> DocumentStore<P> for Replica<P> {
    fn replica_id(&self) -> ReplicaId {
        Replica::replica_id(self)
    }

    fn current_generation(&self) -> CoreResult<(Generation, TransactionId)> {
        Ok(Replica::current_generation(self))
    }

    fn transaction_id_at(&self, generation: Generation) -> CoreResult<Option<TransactionId>> {
        Ok(Replica::transaction_id_at(self, generation))
    }

    fn get(&self, doc_id: &DocId) -> CoreResult<Option<Document<P>>> {
        Ok(Replica::get(self, doc_id))
    }

    fn leaves(&self, doc_id: &DocId) -> CoreResult<Vec<Leaf<P>>> {
        Ok(Replica::leaves(self, doc_id))
    }

    fn put(&self, doc_id: &DocId, leaves: Vec<Leaf<P>>) -> CoreResult<PutResult> {
        self.put_leaves(doc_id, leaves)
    }

    fn changes_since(&self, generation: Generation) -> CoreResult<Vec<ChangeRecord>> {
        Ok(Replica::changes_since(self, generation))
    }

    fn resolve_conflict(&self, doc_id: &DocId, chosen: &Revision) -> CoreResult<Document<P>> {
        Replica::resolve_conflict(self, doc_id, chosen)
    }

    fn set_revision_key(&self, key: RevisionKey) {
        Replica::set_revision_key(self, key);
    }
}
