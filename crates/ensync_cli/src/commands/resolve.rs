//! Resolve command implementation.

use ensync_protocol::{DocId, Revision};
use std::path::Path;
use tracing::info;

/// Collapses a conflicted document onto the leaf `revision`.
pub fn run(
    path: &Path,
    keys: &Path,
    id: &str,
    revision: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let chosen: Revision = revision
        .parse()
        .map_err(|e| format!("Invalid revision {revision:?}: {e}"))?;
    let replica = super::open_replica_for_edit(path, keys)?;
    let doc = replica.resolve_conflict(&DocId::new(id), &chosen)?;
    info!(doc_id = %doc.doc_id, chosen = %chosen, "conflict resolved");

    println!("✓ Resolved {} @ {}", doc.doc_id, doc.revision());
    println!("  Kept: {chosen}");
    Ok(())
}
