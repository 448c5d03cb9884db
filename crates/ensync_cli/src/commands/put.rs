//! Put and delete commands.

use ensync_core::{Content, Document, Replica};
use ensync_protocol::DocId;
use std::path::Path;

/// Creates or updates a document from JSON text.
pub fn run(
    path: &Path,
    keys: &Path,
    id: Option<&str>,
    content: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let content: Content =
        serde_json::from_str(content).map_err(|e| format!("Invalid JSON content: {e}"))?;
    let replica = super::open_replica_for_edit(path, keys)?;
    let doc = put(&replica, id.map(DocId::new), content)?;

    println!("✓ {} @ {}", doc.doc_id, doc.revision());
    println!("  Generation: {}", doc.generation);
    Ok(())
}

/// Deletes a document.
pub fn delete(path: &Path, keys: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let replica = super::open_replica_for_edit(path, keys)?;
    let doc_id = DocId::new(id);
    let current = replica
        .get(&doc_id)
        .ok_or_else(|| format!("Document {id} not found"))?;
    let doc = replica.delete_doc(&doc_id, &current.revision())?;

    println!("✓ Deleted {} @ {}", doc.doc_id, doc.revision());
    Ok(())
}

/// Writes `content` as the next revision of `doc_id`, creating it if needed.
pub fn put(
    replica: &Replica<Content>,
    doc_id: Option<DocId>,
    content: Content,
) -> Result<Document<Content>, Box<dyn std::error::Error>> {
    let Some(doc_id) = doc_id else {
        return Ok(replica.create_doc(content)?);
    };

    match replica.get(&doc_id) {
        Some(current) if !current.is_deleted() => {
            Ok(replica.update_doc(&doc_id, &current.revision(), content)?)
        }
        _ => Ok(replica.create_doc_with_id(&doc_id, content)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_creates_then_updates() {
        let replica: Replica<Content> = Replica::in_memory().unwrap();
        let doc_id = DocId::new("todo");

        let first = put(&replica, Some(doc_id.clone()), json!({"done": false})).unwrap();
        let second = put(&replica, Some(doc_id.clone()), json!({"done": true})).unwrap();
        assert_ne!(first.revision(), second.revision());
        assert_eq!(replica.get(&doc_id).unwrap().content, Some(json!({"done": true})));

        replica.delete_doc(&doc_id, &second.revision()).unwrap();
        let revived = put(&replica, Some(doc_id.clone()), json!({"done": false})).unwrap();
        assert!(!revived.is_deleted());
    }

    #[test]
    fn put_refuses_conflicted_document() {
        let local: Replica<Content> = Replica::in_memory().unwrap();
        let remote: Replica<Content> = Replica::in_memory().unwrap();
        let doc_id = DocId::new("todo");

        let base = put(&local, Some(doc_id.clone()), json!({"v": 0})).unwrap();
        remote.put_leaves(&doc_id, local.leaves(&doc_id)).unwrap();
        put(&local, Some(doc_id.clone()), json!({"v": "local"})).unwrap();
        remote
            .update_doc(&doc_id, &base.revision(), json!({"v": "remote"}))
            .unwrap();
        local.put_leaves(&doc_id, remote.leaves(&doc_id)).unwrap();

        assert!(put(&local, Some(doc_id), json!({"v": "again"})).is_err());
    }

    #[test]
    fn command_edits_use_keyed_revisions() {
        use ensync_core::Payload;
        use ensync_protocol::Lineage;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local");
        let keys = dir.path().join("keys.bin");
        super::super::init::run(&path).unwrap();
        super::super::keygen::run(&keys, false).unwrap();

        run(&path, &keys, Some("todo"), r#"{"done":false}"#).unwrap();

        let replica = super::super::open_replica(&path).unwrap();
        let stored = replica.get(&DocId::new("todo")).unwrap();
        let content = json!({"done": false});
        let unkeyed = Lineage::root(&content.content_digest(None).unwrap(), false);
        assert_ne!(stored.revision(), unkeyed.head);

        delete(&path, &keys, "todo").unwrap();
        assert!(replica_deleted(&path, "todo"));
        assert!(run(&path, &dir.path().join("missing.bin"), None, "{}").is_err());
    }

    fn replica_deleted(path: &Path, id: &str) -> bool {
        let replica = super::super::open_replica(path).unwrap();
        replica.get(&DocId::new(id)).is_some_and(|doc| doc.is_deleted())
    }
}
