//! Documents, leaves and change records.

use crate::crypto::RevisionKey;
use crate::error::CoreResult;
use ensync_protocol::{
    DocId, EncryptedEnvelope, Generation, Lineage, PutOutcome, Revision, TransactionId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Plaintext document content held by local replicas.
pub type Content = serde_json::Value;

/// Content a replica can store.
///
/// Local replicas store [`Content`]; remote replicas store
/// [`EncryptedEnvelope`]s they cannot read.
pub trait Payload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Digest of the content, mixed into revision hashes.
    ///
    /// With a key the digest is an HMAC, so revisions reveal nothing about
    /// the content to anyone without the key.
    fn content_digest(&self, key: Option<&RevisionKey>) -> CoreResult<[u8; 32]>;
}

impl Payload for serde_json::Value {
    fn content_digest(&self, key: Option<&RevisionKey>) -> CoreResult<[u8; 32]> {
        // Object keys are kept sorted, so the compact form is canonical.
        let canonical = self.to_string();
        match key {
            Some(key) => key.digest(canonical.as_bytes()),
            None => Ok(Sha256::digest(canonical.as_bytes()).into()),
        }
    }
}

impl Payload for EncryptedEnvelope {
    // Ciphertext is already opaque; the key is not needed.
    fn content_digest(&self, _key: Option<&RevisionKey>) -> CoreResult<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update([self.scheme.code()]);
        hasher.update(&self.nonce);
        hasher.update(&self.ciphertext);
        hasher.update(&self.mac);
        Ok(hasher.finalize().into())
    }
}

/// Digest used for revisions of optional content; tombstones digest to zeros.
pub(crate) fn digest_of<P: Payload>(
    content: Option<&P>,
    key: Option<&RevisionKey>,
) -> CoreResult<[u8; 32]> {
    match content {
        Some(content) => content.content_digest(key),
        None => Ok([0u8; 32]),
    }
}

/// One version of a document that no other held version supersedes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf<P> {
    /// Revision and ancestry.
    pub lineage: Lineage,
    /// Content, or `None` for a deletion tombstone.
    pub content: Option<P>,
}

impl<P> Leaf<P> {
    /// Creates a leaf.
    pub fn new(lineage: Lineage, content: Option<P>) -> Self {
        Self { lineage, content }
    }

    /// The leaf's revision.
    pub fn revision(&self) -> Revision {
        self.lineage.head
    }

    /// Returns true for a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.content.is_none()
    }

    /// Sort key deciding which leaf is shown as current: live leaves first,
    /// then the deepest, then the highest hash.
    pub(crate) fn winner_key(&self) -> (bool, Revision) {
        (self.content.is_some(), self.lineage.head)
    }
}

/// A document as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<P> {
    /// Document id.
    pub doc_id: DocId,
    /// Current revision and ancestry.
    pub lineage: Lineage,
    /// Current content, `None` when deleted.
    pub content: Option<P>,
    /// True if conflicting leaves exist besides the current one.
    pub has_conflicts: bool,
    /// Generation at which the document last changed.
    pub generation: Generation,
}

impl<P> Document<P> {
    /// The current revision.
    pub fn revision(&self) -> Revision {
        self.lineage.head
    }

    /// Returns true if the current leaf is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.content.is_none()
    }
}

/// One entry of `changes_since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Changed document.
    pub doc_id: DocId,
    /// Latest generation at which the document changed.
    pub generation: Generation,
    /// Transaction id of that generation.
    pub transaction_id: TransactionId,
}

/// Outcome of applying revisions to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// What happened.
    pub outcome: PutOutcome,
    /// Generation consumed by the write, `None` if nothing changed.
    pub generation: Option<Generation>,
    /// Leaf revisions of the document after the write.
    pub leaves: BTreeSet<Revision>,
}

impl PutResult {
    /// Returns true if the write changed the document.
    pub fn changed(&self) -> bool {
        self.generation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_digest_ignores_key_order() {
        let a: Content = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Content = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(a.content_digest(None).unwrap(), b.content_digest(None).unwrap());
        assert_ne!(
            a.content_digest(None).unwrap(),
            json!({"a": 3}).content_digest(None).unwrap()
        );
    }

    #[test]
    fn keyed_digest_hides_content() {
        let key = crate::crypto::KeyMaterial::generate().revision_key();
        let content = json!({"done": true});
        let keyed = content.content_digest(Some(&key)).unwrap();
        assert_ne!(keyed, content.content_digest(None).unwrap());
        assert_eq!(keyed, json!({"done": true}).content_digest(Some(&key)).unwrap());
    }

    #[test]
    fn tombstone_digest() {
        assert_eq!(digest_of::<Content>(None, None).unwrap(), [0u8; 32]);
    }

    #[test]
    fn live_leaf_wins_over_deeper_tombstone() {
        let root = Lineage::root(&[1; 32], false);
        let live = Leaf::new(root.child(&[2; 32], false), Some(json!(1)));
        let dead: Leaf<Content> = Leaf::new(root.child(&[0; 32], true).child(&[0; 32], true), None);
        assert!(live.winner_key() > dead.winner_key());
    }
}
