//! The document store of one replica.
//!
//! A [`Replica`] owns documents, their conflict leaves and the generation
//! log. Every mutation consumes exactly one generation, mints a fresh
//! transaction id and is written to the journal as a single record before
//! the in-memory state changes. The write lock is held across both steps,
//! so readers never see a document without its generation or the reverse.

use crate::config::StoreConfig;
use crate::crypto::RevisionKey;
use crate::dir::ReplicaDir;
use crate::document::{digest_of, ChangeRecord, Document, Leaf, Payload, PutResult};
use crate::error::{CoreError, CoreResult};
use crate::journal::{FileJournal, Journal};
use ensync_protocol::{DocId, Generation, Lineage, PutOutcome, ReplicaId, Revision, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Stored state of one document: the current leaf plus conflicting leaves.
#[derive(Debug, Clone)]
struct DocEntry<P> {
    current: Leaf<P>,
    conflicts: Vec<Leaf<P>>,
    generation: Generation,
}

impl<P: Payload> DocEntry<P> {
    /// Builds an entry from an unordered leaf set, picking the winner.
    fn from_leaves(mut leaves: Vec<Leaf<P>>) -> Option<Self> {
        leaves.sort_by_key(|leaf| std::cmp::Reverse(leaf.winner_key()));
        let mut leaves = leaves.into_iter();
        let current = leaves.next()?;
        Some(Self {
            current,
            conflicts: leaves.collect(),
            generation: Generation::ZERO,
        })
    }

    fn leaves(&self) -> impl Iterator<Item = &Leaf<P>> {
        std::iter::once(&self.current).chain(self.conflicts.iter())
    }

    fn revisions(&self) -> BTreeSet<Revision> {
        self.leaves().map(Leaf::revision).collect()
    }

    fn to_document(&self, doc_id: &DocId) -> Document<P> {
        Document {
            doc_id: doc_id.clone(),
            lineage: self.current.lineage.clone(),
            content: self.current.content.clone(),
            has_conflicts: !self.conflicts.is_empty(),
            generation: self.generation,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum JournalRecord<P> {
    Init {
        replica_id: ReplicaId,
    },
    /// The document's full leaf set after the commit, current leaf first.
    Commit {
        generation: Generation,
        transaction_id: TransactionId,
        doc_id: DocId,
        leaves: Vec<JournalLeaf<P>>,
    },
}

/// A leaf whose ancestry is stored relative to the document's previous
/// leaves, so a record grows with the edit and not with the history.
#[derive(Serialize, Deserialize)]
struct JournalLeaf<P> {
    head: Revision,
    /// Previous leaves this leaf equals or descends from; their heads and
    /// ancestors are inherited.
    bases: Vec<Revision>,
    /// Ancestors no base accounts for.
    extra: BTreeSet<Revision>,
    content: Option<P>,
}

impl<P: Payload> JournalLeaf<P> {
    fn compress(leaf: &Leaf<P>, previous: Option<&DocEntry<P>>) -> Self {
        let lineage = &leaf.lineage;
        let mut bases = Vec::new();
        let mut covered = BTreeSet::new();
        for prior in previous.into_iter().flat_map(DocEntry::leaves) {
            let prior = &prior.lineage;
            if lineage.contains(&prior.head) && prior.ancestors.is_subset(&lineage.ancestors) {
                bases.push(prior.head);
                covered.insert(prior.head);
                covered.extend(prior.ancestors.iter().copied());
            }
        }

        Self {
            head: lineage.head,
            bases,
            extra: lineage.ancestors.difference(&covered).copied().collect(),
            content: leaf.content.clone(),
        }
    }

    fn expand(self, previous: Option<&DocEntry<P>>) -> CoreResult<Leaf<P>> {
        let mut ancestors = self.extra;
        for base in &self.bases {
            let prior = previous
                .and_then(|entry| entry.leaves().find(|leaf| leaf.lineage.head == *base))
                .ok_or_else(|| {
                    CoreError::journal_corruption(format!("leaf {} names unknown base {base}", self.head))
                })?;
            ancestors.insert(prior.lineage.head);
            ancestors.extend(prior.lineage.ancestors.iter().copied());
        }
        ancestors.remove(&self.head);

        Ok(Leaf::new(
            Lineage {
                head: self.head,
                ancestors,
            },
            self.content,
        ))
    }
}

fn encode_record<P: Payload>(record: &JournalRecord<P>) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(record, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

fn decode_record<P: Payload>(bytes: &[u8]) -> CoreResult<JournalRecord<P>> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

struct ReplicaState<P> {
    replica_id: ReplicaId,
    generation: Generation,
    /// `log[g - 1]` describes generation `g`.
    log: Vec<(DocId, TransactionId)>,
    docs: HashMap<DocId, DocEntry<P>>,
    revision_key: Option<RevisionKey>,
}

impl<P: Payload> ReplicaState<P> {
    fn new(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            generation: Generation::ZERO,
            log: Vec::new(),
            docs: HashMap::new(),
            revision_key: None,
        }
    }

    fn transaction_id_at(&self, generation: Generation) -> Option<TransactionId> {
        match generation.value() {
            0 => Some(TransactionId::empty()),
            g => self.log.get(g as usize - 1).map(|(_, txid)| txid.clone()),
        }
    }

    fn current_transaction_id(&self) -> TransactionId {
        self.transaction_id_at(self.generation)
            .unwrap_or_else(TransactionId::empty)
    }

    fn expand_entry(
        &self,
        doc_id: &DocId,
        leaves: Vec<JournalLeaf<P>>,
        generation: Generation,
    ) -> CoreResult<DocEntry<P>> {
        let previous = self.docs.get(doc_id);
        let mut leaves = leaves.into_iter().map(|leaf| leaf.expand(previous));
        let current = leaves
            .next()
            .ok_or_else(|| CoreError::journal_corruption(format!("commit of {doc_id} has no leaves")))??;
        Ok(DocEntry {
            current,
            conflicts: leaves.collect::<CoreResult<_>>()?,
            generation,
        })
    }

    fn apply_commit(
        &mut self,
        generation: Generation,
        transaction_id: TransactionId,
        doc_id: DocId,
        entry: DocEntry<P>,
    ) -> CoreResult<()> {
        if generation != self.generation.next() {
            return Err(CoreError::journal_corruption(format!(
                "generation {generation} follows {}",
                self.generation
            )));
        }
        self.generation = generation;
        self.log.push((doc_id.clone(), transaction_id));
        self.docs.insert(doc_id, entry);
        Ok(())
    }
}

/// Document store of a single replica, generic over what it stores.
///
/// Local replicas store plaintext [`Content`](crate::Content); remote
/// replicas store [`EncryptedEnvelope`](ensync_protocol::EncryptedEnvelope)s.
pub struct Replica<P> {
    state: RwLock<ReplicaState<P>>,
    journal: Box<dyn Journal>,
    dir: Option<ReplicaDir>,
}

impl<P: Payload> Replica<P> {
    /// Creates a fresh in-memory replica.
    pub fn in_memory() -> CoreResult<Self> {
        Self::open_with_journal(Box::new(crate::journal::MemoryJournal::new()))
    }

    /// Opens or creates a file-backed replica in `path`.
    pub fn open(path: &Path, config: &StoreConfig) -> CoreResult<Self> {
        let dir = ReplicaDir::open(path, config.create_if_missing, config.error_if_exists)?;
        let journal = FileJournal::open(&dir.journal_path(), config.sync_on_commit)?;
        let mut replica = Self::open_with_journal(Box::new(journal))?;
        replica.dir = Some(dir);
        Ok(replica)
    }

    /// Opens a replica over an existing journal, replaying its records.
    ///
    /// An empty journal gets a freshly generated replica id.
    pub fn open_with_journal(journal: Box<dyn Journal>) -> CoreResult<Self> {
        Self::open_inner(journal, None)
    }

    /// Creates a replica with a caller-chosen id over an empty journal.
    ///
    /// Used when a replica is rebuilt under an id that peers already know.
    pub fn create_with_id(journal: Box<dyn Journal>, replica_id: ReplicaId) -> CoreResult<Self> {
        if !journal.replay()?.is_empty() {
            return Err(CoreError::invalid_format(
                "cannot assign a replica id to a non-empty journal",
            ));
        }
        Self::open_inner(journal, Some(replica_id))
    }

    fn open_inner(journal: Box<dyn Journal>, replica_id: Option<ReplicaId>) -> CoreResult<Self> {
        let records = journal.replay()?;

        let state = if records.is_empty() {
            let replica_id = replica_id.unwrap_or_else(ReplicaId::generate);
            journal.append(&encode_record::<P>(&JournalRecord::Init {
                replica_id: replica_id.clone(),
            })?)?;
            ReplicaState::new(replica_id)
        } else {
            let mut records = records.iter();
            let mut state = match records.next().map(|r| decode_record::<P>(r)).transpose()? {
                Some(JournalRecord::Init { replica_id }) => ReplicaState::new(replica_id),
                _ => return Err(CoreError::journal_corruption("journal has no init record")),
            };
            for bytes in records {
                match decode_record::<P>(bytes)? {
                    JournalRecord::Commit {
                        generation,
                        transaction_id,
                        doc_id,
                        leaves,
                    } => {
                        let entry = state.expand_entry(&doc_id, leaves, generation)?;
                        state.apply_commit(generation, transaction_id, doc_id, entry)?;
                    }
                    JournalRecord::Init { .. } => {
                        return Err(CoreError::journal_corruption("duplicate init record"))
                    }
                }
            }
            state
        };

        info!(
            replica = %state.replica_id,
            generation = %state.generation,
            documents = state.docs.len(),
            "replica opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            journal,
            dir: None,
        })
    }

    /// Keys the content digests of revisions this replica mints from now on.
    ///
    /// Replicas that sync with each other must share the key, which
    /// [`KeyMaterial::revision_key`](crate::crypto::KeyMaterial::revision_key)
    /// provides. Without a key, revisions carry a plain content hash.
    pub fn set_revision_key(&self, key: RevisionKey) {
        self.state.write().revision_key = Some(key);
    }

    /// Builder form of [`set_revision_key`](Self::set_revision_key).
    #[must_use]
    pub fn with_revision_key(self, key: RevisionKey) -> Self {
        self.set_revision_key(key);
        self
    }

    /// Returns true if revision digests are keyed.
    pub fn has_revision_key(&self) -> bool {
        self.state.read().revision_key.is_some()
    }

    /// Returns the directory of a file-backed replica.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(ReplicaDir::path)
    }

    /// Returns the replica id.
    pub fn replica_id(&self) -> ReplicaId {
        self.state.read().replica_id.clone()
    }

    /// Returns the current generation and its transaction id.
    pub fn current_generation(&self) -> (Generation, TransactionId) {
        let state = self.state.read();
        (state.generation, state.current_transaction_id())
    }

    /// Returns the transaction id at `generation`, or `None` past the log end.
    pub fn transaction_id_at(&self, generation: Generation) -> Option<TransactionId> {
        self.state.read().transaction_id_at(generation)
    }

    /// Returns the document's current state, including deleted documents.
    pub fn get(&self, doc_id: &DocId) -> Option<Document<P>> {
        self.state
            .read()
            .docs
            .get(doc_id)
            .map(|entry| entry.to_document(doc_id))
    }

    /// Returns every leaf of the document, current leaf first.
    pub fn leaves(&self, doc_id: &DocId) -> Vec<Leaf<P>> {
        self.state
            .read()
            .docs
            .get(doc_id)
            .map(|entry| entry.leaves().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the conflicting leaves of the document, excluding the current one.
    pub fn conflicts(&self, doc_id: &DocId) -> Vec<Leaf<P>> {
        self.state
            .read()
            .docs
            .get(doc_id)
            .map(|entry| entry.conflicts.clone())
            .unwrap_or_default()
    }

    /// Returns all documents ordered by id. Deleted documents are included
    /// only if `include_deleted` is set.
    pub fn all_docs(&self, include_deleted: bool) -> Vec<Document<P>> {
        let state = self.state.read();
        let mut docs: Vec<_> = state
            .docs
            .iter()
            .filter(|(_, entry)| include_deleted || !entry.current.is_deleted())
            .map(|(doc_id, entry)| entry.to_document(doc_id))
            .collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        docs
    }

    /// Returns the ids of documents that have conflicts, ordered by id.
    pub fn conflicted_docs(&self) -> Vec<DocId> {
        let state = self.state.read();
        let mut ids: Vec<_> = state
            .docs
            .iter()
            .filter(|(_, entry)| !entry.conflicts.is_empty())
            .map(|(doc_id, _)| doc_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Creates a document under a generated id.
    pub fn create_doc(&self, content: P) -> CoreResult<Document<P>> {
        self.create_doc_with_id(&DocId::generate(), content)
    }

    /// Creates a document under `doc_id`. A deleted document is revived on
    /// top of its tombstone.
    pub fn create_doc_with_id(&self, doc_id: &DocId, content: P) -> CoreResult<Document<P>> {
        let mut state = self.state.write();
        let digest = content.content_digest(state.revision_key.as_ref())?;

        let lineage = match state.docs.get(doc_id) {
            None => Lineage::root(&digest, false),
            Some(entry) if !entry.conflicts.is_empty() => {
                return Err(CoreError::DocumentConflicted {
                    doc_id: doc_id.clone(),
                })
            }
            Some(entry) if entry.current.is_deleted() => {
                entry.current.lineage.child(&digest, false)
            }
            Some(_) => {
                return Err(CoreError::DocumentExists {
                    doc_id: doc_id.clone(),
                })
            }
        };

        self.write_single(&mut state, doc_id, Leaf::new(lineage, Some(content)))
    }

    /// Replaces the content of a document whose current revision is `parent`.
    pub fn update_doc(&self, doc_id: &DocId, parent: &Revision, content: P) -> CoreResult<Document<P>> {
        self.edit(doc_id, parent, Some(content))
    }

    /// Deletes a document whose current revision is `parent`, leaving a tombstone.
    pub fn delete_doc(&self, doc_id: &DocId, parent: &Revision) -> CoreResult<Document<P>> {
        self.edit(doc_id, parent, None)
    }

    fn edit(&self, doc_id: &DocId, parent: &Revision, content: Option<P>) -> CoreResult<Document<P>> {
        let mut state = self.state.write();
        let entry = state
            .docs
            .get(doc_id)
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_id: doc_id.clone(),
            })?;

        if !entry.conflicts.is_empty() {
            return Err(CoreError::DocumentConflicted {
                doc_id: doc_id.clone(),
            });
        }
        if entry.current.revision() != *parent {
            return Err(CoreError::RevisionMismatch {
                doc_id: doc_id.clone(),
                expected: *parent,
                actual: entry.current.revision(),
            });
        }
        if content.is_none() && entry.current.is_deleted() {
            return Err(CoreError::AlreadyDeleted {
                doc_id: doc_id.clone(),
            });
        }

        let digest = digest_of(content.as_ref(), state.revision_key.as_ref())?;
        let lineage = entry.current.lineage.child(&digest, content.is_none());
        self.write_single(&mut state, doc_id, Leaf::new(lineage, content))
    }

    fn write_single(
        &self,
        state: &mut ReplicaState<P>,
        doc_id: &DocId,
        leaf: Leaf<P>,
    ) -> CoreResult<Document<P>> {
        let entry = DocEntry {
            current: leaf,
            conflicts: Vec::new(),
            generation: Generation::ZERO,
        };
        self.commit(state, doc_id, entry)?;
        state
            .docs
            .get(doc_id)
            .map(|entry| entry.to_document(doc_id))
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_id: doc_id.clone(),
            })
    }

    /// Applies revisions received from another replica.
    ///
    /// Each incoming leaf that is already held, or superseded by a held leaf,
    /// is ignored. Otherwise it replaces every held leaf it descends from and
    /// joins the leaf set. Concurrent leaves are kept side by side, so a
    /// conflict never loses a revision. Re-applying the same revisions is a
    /// no-op that consumes no generation.
    pub fn put_leaves(&self, doc_id: &DocId, incoming: Vec<Leaf<P>>) -> CoreResult<PutResult> {
        let mut state = self.state.write();

        let mut leaves: Vec<Leaf<P>> = state
            .docs
            .get(doc_id)
            .map(|entry| entry.leaves().cloned().collect())
            .unwrap_or_default();

        let mut incoming = incoming;
        incoming.sort_by_key(Leaf::revision);

        let mut changed = false;
        for leaf in incoming {
            let head = leaf.revision();
            if leaves.iter().any(|held| held.lineage.contains(&head)) {
                continue;
            }
            leaves.retain(|held| !leaf.lineage.supersedes(&held.revision()));
            leaves.push(leaf);
            changed = true;
        }

        let Some(entry) = DocEntry::from_leaves(leaves) else {
            return Ok(PutResult {
                outcome: PutOutcome::Unchanged,
                generation: None,
                leaves: BTreeSet::new(),
            });
        };
        let revisions = entry.revisions();

        if !changed {
            return Ok(PutResult {
                outcome: PutOutcome::Unchanged,
                generation: None,
                leaves: revisions,
            });
        }

        let outcome = if entry.conflicts.is_empty() {
            PutOutcome::Applied
        } else {
            PutOutcome::Conflicted
        };
        let generation = self.commit(&mut state, doc_id, entry)?;

        debug!(doc_id = %doc_id, ?outcome, %generation, "applied remote revisions");

        Ok(PutResult {
            outcome,
            generation: Some(generation),
            leaves: revisions,
        })
    }

    /// Resolves a conflicted document in favour of one of its leaves.
    ///
    /// The result is a new revision carrying the chosen leaf's content that
    /// supersedes every leaf, so syncing it clears the conflict on other
    /// replicas that hold the same leaves.
    pub fn resolve_conflict(&self, doc_id: &DocId, chosen: &Revision) -> CoreResult<Document<P>> {
        let mut state = self.state.write();
        let entry = state
            .docs
            .get(doc_id)
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_id: doc_id.clone(),
            })?;

        if entry.conflicts.is_empty() {
            return Err(CoreError::NotConflicted {
                doc_id: doc_id.clone(),
            });
        }

        let winner = entry
            .leaves()
            .find(|leaf| leaf.revision() == *chosen)
            .ok_or_else(|| CoreError::UnknownRevision {
                doc_id: doc_id.clone(),
                revision: *chosen,
            })?;

        let content = winner.content.clone();
        let lineage = {
            let parents: Vec<&Lineage> = entry.leaves().map(|leaf| &leaf.lineage).collect();
            let digest = digest_of(content.as_ref(), state.revision_key.as_ref())?;
            Lineage::merge(&parents, &digest, content.is_none())
        };

        debug!(doc_id = %doc_id, chosen = %chosen, resolved = %lineage.head, "conflict resolved");
        self.write_single(&mut state, doc_id, Leaf::new(lineage, content))
    }

    /// Returns one record per document changed after `generation`, carrying
    /// its latest generation, in ascending generation order.
    pub fn changes_since(&self, generation: Generation) -> Vec<ChangeRecord> {
        let state = self.state.read();
        let start = (generation.value() as usize).min(state.log.len());

        let mut seen = HashSet::new();
        let mut changes: Vec<ChangeRecord> = state.log[start..]
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, (doc_id, _))| seen.insert(doc_id))
            .map(|(offset, (doc_id, transaction_id))| ChangeRecord {
                doc_id: doc_id.clone(),
                generation: Generation((start + offset + 1) as u64),
                transaction_id: transaction_id.clone(),
            })
            .collect();
        changes.reverse();
        changes
    }

    /// Number of documents, including deleted ones.
    pub fn doc_count(&self) -> usize {
        self.state.read().docs.len()
    }

    fn commit(
        &self,
        state: &mut ReplicaState<P>,
        doc_id: &DocId,
        mut entry: DocEntry<P>,
    ) -> CoreResult<Generation> {
        let generation = state.generation.next();
        let transaction_id = TransactionId::generate();
        entry.generation = generation;

        let previous = state.docs.get(doc_id);
        let record = JournalRecord::Commit {
            generation,
            transaction_id: transaction_id.clone(),
            doc_id: doc_id.clone(),
            leaves: entry
                .leaves()
                .map(|leaf| JournalLeaf::compress(leaf, previous))
                .collect(),
        };
        self.journal.append(&encode_record(&record)?)?;

        state.apply_commit(generation, transaction_id, doc_id.clone(), entry)?;
        Ok(generation)
    }
}

impl<P> std::fmt::Debug for Replica<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Replica")
            .field("replica_id", &state.replica_id)
            .field("generation", &state.generation)
            .field("documents", &state.docs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Content;
    use crate::journal::MemoryJournal;
    use serde_json::json;

    fn replica() -> Replica<Content> {
        Replica::in_memory().unwrap()
    }

    fn leaf(lineage: &Lineage, content: Content) -> Leaf<Content> {
        Leaf::new(lineage.clone(), Some(content))
    }

    #[test]
    fn keyed_replicas_agree_on_revisions() {
        let keys = crate::crypto::KeyMaterial::generate();
        let a = replica().with_revision_key(keys.revision_key());
        let b = replica().with_revision_key(keys.revision_key());
        let plain = replica();
        assert!(a.has_revision_key());
        assert!(!plain.has_revision_key());

        let doc_id = DocId::new("todo");
        let content = json!({"done": true});
        let on_a = a.create_doc_with_id(&doc_id, content.clone()).unwrap();
        let on_b = b.create_doc_with_id(&doc_id, content.clone()).unwrap();
        let on_plain = plain.create_doc_with_id(&doc_id, content.clone()).unwrap();
        assert_eq!(on_a.revision(), on_b.revision());
        assert_ne!(on_a.revision(), on_plain.revision());

        // Without the key the content cannot be recovered from the revision.
        let guess = Lineage::root(&content.content_digest(None).unwrap(), false);
        assert_ne!(guess.head, on_a.revision());
        assert_eq!(guess.head, on_plain.revision());

        let updated = a
            .update_doc(&doc_id, &on_a.revision(), json!({"done": false}))
            .unwrap();
        let unkeyed_child = on_a
            .lineage
            .child(&json!({"done": false}).content_digest(None).unwrap(), false);
        assert_ne!(updated.revision(), unkeyed_child.head);
    }

    #[test]
    fn empty_replica() {
        let replica = replica();
        let (generation, txid) = replica.current_generation();
        assert_eq!(generation, Generation::ZERO);
        assert!(txid.is_empty());
        assert!(replica.changes_since(Generation::ZERO).is_empty());
    }

    #[test]
    fn every_write_bumps_generation() {
        let replica = replica();
        let doc = replica.create_doc(json!({"n": 1})).unwrap();
        assert_eq!(doc.generation, Generation(1));

        let doc = replica
            .update_doc(&doc.doc_id, &doc.revision(), json!({"n": 2}))
            .unwrap();
        assert_eq!(doc.generation, Generation(2));

        let doc = replica.delete_doc(&doc.doc_id, &doc.revision()).unwrap();
        assert!(doc.is_deleted());

        let (generation, txid) = replica.current_generation();
        assert_eq!(generation, Generation(3));
        assert_eq!(replica.transaction_id_at(Generation(3)), Some(txid));
        assert_ne!(
            replica.transaction_id_at(Generation(1)),
            replica.transaction_id_at(Generation(2))
        );
        assert_eq!(replica.transaction_id_at(Generation(4)), None);
    }

    #[test]
    fn stale_parent_is_rejected() {
        let replica = replica();
        let doc = replica.create_doc(json!(1)).unwrap();
        replica
            .update_doc(&doc.doc_id, &doc.revision(), json!(2))
            .unwrap();

        let err = replica
            .update_doc(&doc.doc_id, &doc.revision(), json!(3))
            .unwrap_err();
        assert!(matches!(err, CoreError::RevisionMismatch { .. }));
        assert_eq!(replica.current_generation().0, Generation(2));
    }

    #[test]
    fn create_existing_and_revive_deleted() {
        let replica = replica();
        let id = DocId::new("doc");
        let doc = replica.create_doc_with_id(&id, json!("a")).unwrap();
        assert!(matches!(
            replica.create_doc_with_id(&id, json!("b")),
            Err(CoreError::DocumentExists { .. })
        ));

        let deleted = replica.delete_doc(&id, &doc.revision()).unwrap();
        assert!(matches!(
            replica.delete_doc(&id, &deleted.revision()),
            Err(CoreError::AlreadyDeleted { .. })
        ));

        let revived = replica.create_doc_with_id(&id, json!("c")).unwrap();
        assert_eq!(revived.lineage.compare(&deleted.lineage), ensync_protocol::RevisionOrder::Descendant);
    }

    #[test]
    fn changes_since_reports_latest_generation_once() {
        let replica = replica();
        let a = replica.create_doc_with_id(&DocId::new("a"), json!(1)).unwrap();
        let b = replica.create_doc_with_id(&DocId::new("b"), json!(1)).unwrap();
        replica.update_doc(&a.doc_id, &a.revision(), json!(2)).unwrap();

        let changes = replica.changes_since(Generation::ZERO);
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.doc_id.as_str().to_string(), c.generation.value()))
            .collect();
        assert_eq!(summary, vec![("b".to_string(), 2), ("a".to_string(), 3)]);

        let later = replica.changes_since(Generation(2));
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].doc_id, a.doc_id);
        assert_eq!(later[0].transaction_id, replica.current_generation().1);

        assert!(replica.changes_since(Generation(3)).is_empty());
        assert!(replica.changes_since(Generation(99)).is_empty());
        let _ = b;
    }

    #[test]
    fn put_descendant_applies() {
        let replica = replica();
        let id = DocId::new("doc");
        let root = Lineage::root(&[1; 32], false);
        let child = root.child(&[2; 32], false);

        let first = replica.put_leaves(&id, vec![leaf(&root, json!(1))]).unwrap();
        assert_eq!(first.outcome, PutOutcome::Applied);

        let second = replica.put_leaves(&id, vec![leaf(&child, json!(2))]).unwrap();
        assert_eq!(second.outcome, PutOutcome::Applied);
        assert_eq!(second.leaves, BTreeSet::from([child.head]));
        assert_eq!(replica.get(&id).unwrap().content, Some(json!(2)));
    }

    #[test]
    fn put_known_or_ancestor_is_noop() {
        let replica = replica();
        let id = DocId::new("doc");
        let root = Lineage::root(&[1; 32], false);
        let child = root.child(&[2; 32], false);

        replica.put_leaves(&id, vec![leaf(&child, json!(2))]).unwrap();
        let generation = replica.current_generation().0;

        for stale in [leaf(&child, json!(2)), leaf(&root, json!(1))] {
            let result = replica.put_leaves(&id, vec![stale]).unwrap();
            assert_eq!(result.outcome, PutOutcome::Unchanged);
            assert!(!result.changed());
        }
        assert_eq!(replica.current_generation().0, generation);
    }

    #[test]
    fn concurrent_put_keeps_both_leaves() {
        let replica = replica();
        let base = replica.create_doc(json!(0)).unwrap();
        let local = replica
            .update_doc(&base.doc_id, &base.revision(), json!("local"))
            .unwrap();
        let remote = base.lineage.child(&[9; 32], false);

        let result = replica
            .put_leaves(&base.doc_id, vec![leaf(&remote, json!("remote"))])
            .unwrap();
        assert_eq!(result.outcome, PutOutcome::Conflicted);
        assert_eq!(result.leaves, BTreeSet::from([local.revision(), remote.head]));

        let current = replica.get(&base.doc_id).unwrap();
        assert!(current.has_conflicts);
        assert_eq!(replica.leaves(&base.doc_id).len(), 2);
        assert_eq!(replica.conflicts(&base.doc_id).len(), 1);
        assert_eq!(replica.conflicted_docs(), vec![base.doc_id.clone()]);
    }

    #[test]
    fn conflicted_document_refuses_edits() {
        let replica = replica();
        let base = replica.create_doc(json!(0)).unwrap();
        let local = replica
            .update_doc(&base.doc_id, &base.revision(), json!(1))
            .unwrap();
        let remote = base.lineage.child(&[7; 32], false);
        replica
            .put_leaves(&base.doc_id, vec![leaf(&remote, json!(2))])
            .unwrap();

        let current = replica.get(&base.doc_id).unwrap();
        assert!(matches!(
            replica.update_doc(&base.doc_id, &current.revision(), json!(3)),
            Err(CoreError::DocumentConflicted { .. })
        ));
        let _ = local;
    }

    #[test]
    fn resolve_collapses_all_leaves() {
        let replica = replica();
        let base = replica.create_doc(json!(0)).unwrap();
        let local = replica
            .update_doc(&base.doc_id, &base.revision(), json!("mine"))
            .unwrap();
        let remote = base.lineage.child(&[7; 32], false);
        replica
            .put_leaves(&base.doc_id, vec![leaf(&remote, json!("theirs"))])
            .unwrap();

        let resolved = replica.resolve_conflict(&base.doc_id, &remote.head).unwrap();
        assert!(!resolved.has_conflicts);
        assert_eq!(resolved.content, Some(json!("theirs")));
        assert!(resolved.lineage.supersedes(&local.revision()));
        assert!(resolved.lineage.supersedes(&remote.head));
        assert!(replica.conflicted_docs().is_empty());

        assert!(matches!(
            replica.resolve_conflict(&base.doc_id, &resolved.revision()),
            Err(CoreError::NotConflicted { .. })
        ));
    }

    #[test]
    fn resolve_rejects_unknown_revision() {
        let replica = replica();
        let base = replica.create_doc(json!(0)).unwrap();
        replica
            .update_doc(&base.doc_id, &base.revision(), json!(1))
            .unwrap();
        replica
            .put_leaves(&base.doc_id, vec![leaf(&base.lineage.child(&[3; 32], false), json!(2))])
            .unwrap();

        let stranger = Lineage::root(&[42; 32], false).head;
        assert!(matches!(
            replica.resolve_conflict(&base.doc_id, &stranger),
            Err(CoreError::UnknownRevision { .. })
        ));
    }

    #[test]
    fn winner_is_deterministic() {
        let base = Lineage::root(&[0; 32], false);
        let left = leaf(&base.child(&[1; 32], false), json!("left"));
        let right = leaf(&base.child(&[2; 32], false), json!("right"));

        let a = replica();
        let b = replica();
        let id = DocId::new("doc");
        a.put_leaves(&id, vec![left.clone()]).unwrap();
        a.put_leaves(&id, vec![right.clone()]).unwrap();
        b.put_leaves(&id, vec![right, left]).unwrap();

        assert_eq!(a.get(&id).unwrap().revision(), b.get(&id).unwrap().revision());
    }

    #[test]
    fn journal_failure_leaves_state_untouched() {
        let journal = MemoryJournal::new();
        let replica: Replica<Content> = Replica::open_with_journal(Box::new(journal.clone())).unwrap();
        let doc = replica.create_doc(json!(1)).unwrap();

        journal.set_fail_appends(true);
        assert!(replica.update_doc(&doc.doc_id, &doc.revision(), json!(2)).is_err());

        assert_eq!(replica.current_generation().0, Generation(1));
        assert_eq!(replica.get(&doc.doc_id).unwrap().content, Some(json!(1)));
    }

    #[test]
    fn replay_restores_state() {
        let journal = MemoryJournal::new();
        let (replica_id, doc_id, generation, txid) = {
            let replica: Replica<Content> =
                Replica::open_with_journal(Box::new(journal.clone())).unwrap();
            let base = replica.create_doc(json!(0)).unwrap();
            replica
                .update_doc(&base.doc_id, &base.revision(), json!(1))
                .unwrap();
            replica
                .put_leaves(&base.doc_id, vec![leaf(&base.lineage.child(&[5; 32], false), json!(2))])
                .unwrap();
            let (generation, txid) = replica.current_generation();
            (replica.replica_id(), base.doc_id, generation, txid)
        };

        let reopened: Replica<Content> = Replica::open_with_journal(Box::new(journal)).unwrap();
        assert_eq!(reopened.replica_id(), replica_id);
        assert_eq!(reopened.current_generation(), (generation, txid));
        assert!(reopened.get(&doc_id).unwrap().has_conflicts);
        assert_eq!(reopened.changes_since(Generation::ZERO).len(), 1);
    }

    #[test]
    fn journal_records_stay_small_as_history_grows() {
        let journal = MemoryJournal::new();
        let replica: Replica<Content> =
            Replica::open_with_journal(Box::new(journal.clone())).unwrap();

        let mut doc = replica.create_doc(json!({"n": 0})).unwrap();
        let mut sizes = Vec::new();
        for n in 1..=60 {
            doc = replica
                .update_doc(&doc.doc_id, &doc.revision(), json!({"n": n % 10}))
                .unwrap();
            sizes.push(journal.replay().unwrap().last().unwrap().len());
        }
        assert_eq!(doc.lineage.ancestors.len(), 60);
        // Sixty inlined ancestors would add kilobytes; allow only encoding jitter.
        assert!(sizes[59] < sizes[0] + 128, "record grew from {} to {}", sizes[0], sizes[59]);

        let reopened: Replica<Content> = Replica::open_with_journal(Box::new(journal)).unwrap();
        assert_eq!(reopened.leaves(&doc.doc_id), replica.leaves(&doc.doc_id));
    }

    #[test]
    fn replay_rebuilds_full_lineages_of_conflicts() {
        let journal = MemoryJournal::new();
        let replica: Replica<Content> =
            Replica::open_with_journal(Box::new(journal.clone())).unwrap();

        let base = replica.create_doc(json!(0)).unwrap();
        let local = replica
            .update_doc(&base.doc_id, &base.revision(), json!("local"))
            .unwrap();
        // A remote branch with history this replica never saw.
        let remote = base
            .lineage
            .child(&[7; 32], false)
            .child(&[8; 32], false)
            .child(&[9; 32], false);
        replica
            .put_leaves(&base.doc_id, vec![leaf(&remote, json!("remote"))])
            .unwrap();
        let resolved = replica
            .resolve_conflict(&base.doc_id, &local.revision())
            .unwrap();
        replica
            .update_doc(&base.doc_id, &resolved.revision(), json!("after"))
            .unwrap();

        let reopened: Replica<Content> = Replica::open_with_journal(Box::new(journal)).unwrap();
        let leaves = reopened.leaves(&base.doc_id);
        assert_eq!(leaves, replica.leaves(&base.doc_id));
        assert_eq!(leaves.len(), 1);
        for revision in [base.revision(), local.revision(), remote.head, resolved.revision()] {
            assert!(leaves[0].lineage.supersedes(&revision));
        }
    }

    #[test]
    fn create_with_id_requires_empty_journal() {
        let journal = MemoryJournal::new();
        let id = ReplicaId::new("fixed-id");
        let replica: Replica<Content> =
            Replica::create_with_id(Box::new(journal.clone()), id.clone()).unwrap();
        assert_eq!(replica.replica_id(), id);

        let again: CoreResult<Replica<Content>> =
            Replica::create_with_id(Box::new(journal), ReplicaId::new("other"));
        assert!(again.is_err());
    }
}
