//! Property-based test generators using proptest.
//!
//! Provides strategies for document content and for sequences of edits
//! that are valid against any replica.

use ensync_core::{Content, Replica};
use ensync_protocol::DocId;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for generating document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = DocId> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}")
        .expect("Invalid regex")
        .prop_map(DocId::new)
}

/// Strategy for scalar JSON values.
fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,32}".prop_map(Value::String),
    ]
}

/// Strategy for document content: JSON objects with up to two levels of
/// nesting.
pub fn content_strategy() -> impl Strategy<Value = Content> {
    let nested = prop::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 0..4)
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>()));
    prop::collection::btree_map("[a-z]{1,8}", prop_oneof![scalar_strategy(), nested], 0..6)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}

/// One edit of a replica.
#[derive(Debug, Clone)]
pub enum EditOp {
    /// Create a new document.
    Create(Content),
    /// Update the n-th live document (modulo the live count).
    Update(usize, Content),
    /// Delete the n-th live document (modulo the live count).
    Delete(usize),
}

/// Strategy for generating a single edit.
pub fn edit_strategy() -> impl Strategy<Value = EditOp> {
    prop_oneof![
        3 => content_strategy().prop_map(EditOp::Create),
        2 => (any::<usize>(), content_strategy()).prop_map(|(n, c)| EditOp::Update(n, c)),
        1 => any::<usize>().prop_map(EditOp::Delete),
    ]
}

/// Strategy for generating a sequence of edits.
pub fn edits_strategy(max_len: usize) -> impl Strategy<Value = Vec<EditOp>> {
    prop::collection::vec(edit_strategy(), 0..max_len)
}

/// Applies edits to a replica. Updates and deletes on a replica without
/// live, unconflicted documents are skipped.
///
/// Returns the number of edits that consumed a generation.
pub fn apply_edits(replica: &Replica<Content>, edits: &[EditOp]) -> usize {
    let mut applied = 0;
    for edit in edits {
        let live: Vec<_> = replica
            .all_docs(false)
            .into_iter()
            .filter(|doc| !doc.has_conflicts)
            .collect();

        match edit {
            EditOp::Create(content) => {
                replica
                    .create_doc(content.clone())
                    .expect("Failed to create document");
                applied += 1;
            }
            EditOp::Update(n, content) if !live.is_empty() => {
                let doc = &live[n % live.len()];
                replica
                    .update_doc(&doc.doc_id, &doc.revision(), content.clone())
                    .expect("Failed to update document");
                applied += 1;
            }
            EditOp::Delete(n) if !live.is_empty() => {
                let doc = &live[n % live.len()];
                replica
                    .delete_doc(&doc.doc_id, &doc.revision())
                    .expect("Failed to delete document");
                applied += 1;
            }
            _ => {}
        }
    }
    applied
}
