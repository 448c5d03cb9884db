//! Benchmark utilities.

use ensync_core::{Content, Replica};
use ensync_protocol::DocId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

/// Generate a document whose body is roughly `size` bytes of text.
pub fn random_content(size: usize) -> Content {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect();
    json!({"title": "bench", "body": body})
}

/// Create `count` documents of roughly `size` bytes each.
pub fn populate(replica: &Replica<Content>, count: usize, size: usize) -> Vec<DocId> {
    (0..count)
        .map(|_| {
            replica
                .create_doc(random_content(size))
                .expect("Failed to create document")
                .doc_id
        })
        .collect()
}
