//! Integration tests for file-backed replicas.

use ensync_core::crypto::{CryptoCodec, KeyMaterial};
use ensync_core::{
    checkpoints_path, Checkpoint, CheckpointStore, Content, CoreError, FileCheckpointStore,
    Leaf, Replica, StoreConfig,
};
use ensync_protocol::{DocId, EncryptedEnvelope, Generation, PutOutcome, ReplicaId};
use proptest::prelude::*;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn file_replica_survives_restart() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::default();

    let (replica_id, doc_id, generation) = {
        let replica: Replica<Content> = Replica::open(dir.path(), &config).unwrap();
        let doc = replica.create_doc(json!({"note": "first"})).unwrap();
        let doc = replica
            .update_doc(&doc.doc_id, &doc.revision(), json!({"note": "second"}))
            .unwrap();
        (replica.replica_id(), doc.doc_id, replica.current_generation())
    };

    let replica: Replica<Content> = Replica::open(dir.path(), &config).unwrap();
    assert_eq!(replica.replica_id(), replica_id);
    assert_eq!(replica.current_generation(), generation);
    assert_eq!(
        replica.get(&doc_id).unwrap().content,
        Some(json!({"note": "second"}))
    );
    assert_eq!(replica.path(), Some(dir.path()));
}

#[test]
fn replica_directory_is_exclusive() {
    let dir = tempdir().unwrap();
    let _first: Replica<Content> = Replica::open(dir.path(), &StoreConfig::default()).unwrap();
    let second: Result<Replica<Content>, _> = Replica::open(dir.path(), &StoreConfig::default());
    assert!(matches!(second, Err(CoreError::ReplicaLocked)));
}

#[test]
fn error_if_exists() {
    let dir = tempdir().unwrap();
    drop(Replica::<Content>::open(dir.path(), &StoreConfig::default()).unwrap());

    let config = StoreConfig::new().error_if_exists(true);
    assert!(Replica::<Content>::open(dir.path(), &config).is_err());
}

#[test]
fn remote_replica_stores_envelopes() {
    let dir = tempdir().unwrap();
    let codec = CryptoCodec::new(KeyMaterial::generate());
    let local: Replica<Content> = Replica::in_memory().unwrap();
    let doc = local.create_doc(json!({"secret": "plans"})).unwrap();

    let envelope = codec.encrypt(&doc.doc_id, &doc.revision(), &json!({"secret": "plans"})).unwrap();

    {
        let remote: Replica<EncryptedEnvelope> =
            Replica::open(dir.path(), &StoreConfig::default()).unwrap();
        let result = remote
            .put_leaves(&doc.doc_id, vec![Leaf::new(doc.lineage.clone(), Some(envelope))])
            .unwrap();
        assert_eq!(result.outcome, PutOutcome::Applied);
    }

    let journal = std::fs::read(dir.path().join("journal.log")).unwrap();
    assert!(!journal.windows(5).any(|w| w == b"plans"));

    let remote: Replica<EncryptedEnvelope> =
        Replica::open(dir.path(), &StoreConfig::default()).unwrap();
    let stored = remote.get(&doc.doc_id).unwrap();
    let plaintext = codec
        .decrypt(&doc.doc_id, &stored.revision(), stored.content.as_ref().unwrap())
        .unwrap();
    assert_eq!(plaintext, json!({"secret": "plans"}));
}

#[test]
fn checkpoints_live_next_to_the_journal() {
    let dir = tempdir().unwrap();
    let replica: Replica<Content> = Replica::open(dir.path(), &StoreConfig::default()).unwrap();
    let store = FileCheckpointStore::open(&checkpoints_path(dir.path())).unwrap();

    let target = ReplicaId::new("server");
    let checkpoint = Checkpoint::new(Generation(4), ensync_protocol::TransactionId::new("T-4"));
    store.set(&replica.replica_id(), &target, checkpoint.clone()).unwrap();

    let reopened = FileCheckpointStore::open(&dir.path().join("CHECKPOINTS")).unwrap();
    assert_eq!(
        reopened.get(&replica.replica_id(), &target).unwrap(),
        Some(checkpoint)
    );
}

#[derive(Debug, Clone)]
enum Edit {
    Create(i64),
    Update(usize, i64),
    Delete(usize),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        2 => any::<i64>().prop_map(Edit::Create),
        3 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| Edit::Update(i, v)),
        1 => any::<usize>().prop_map(Edit::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generation_counts_successful_writes(edits in prop::collection::vec(edit_strategy(), 1..40)) {
        let replica: Replica<Content> = Replica::in_memory().unwrap();
        let mut ids: Vec<DocId> = Vec::new();
        let mut writes = 0u64;
        let mut last = Generation::ZERO;

        for edit in edits {
            let result = match edit {
                Edit::Create(v) => replica.create_doc(json!(v)).map(|doc| ids.push(doc.doc_id)),
                Edit::Update(i, v) if !ids.is_empty() => {
                    let id = &ids[i % ids.len()];
                    let doc = replica.get(id).unwrap();
                    replica.update_doc(id, &doc.revision(), json!(v)).map(|_| ())
                }
                Edit::Delete(i) if !ids.is_empty() => {
                    let id = &ids[i % ids.len()];
                    let doc = replica.get(id).unwrap();
                    replica.delete_doc(id, &doc.revision()).map(|_| ())
                }
                _ => continue,
            };
            if result.is_ok() {
                writes += 1;
            }

            let (generation, txid) = replica.current_generation();
            prop_assert!(generation >= last);
            prop_assert_eq!(generation.value(), writes);
            prop_assert_eq!(replica.transaction_id_at(generation), Some(txid));
            last = generation;
        }

        let changes = replica.changes_since(Generation::ZERO);
        prop_assert!(changes.windows(2).all(|w| w[0].generation < w[1].generation));
        prop_assert_eq!(changes.len(), replica.doc_count());
    }
}
