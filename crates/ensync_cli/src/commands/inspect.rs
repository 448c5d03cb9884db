//! Inspect command implementation.

use ensync_core::{checkpoints_path, CheckpointStore, Content, FileCheckpointStore, Replica};
use serde::Serialize;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica path.
    pub path: String,
    /// Replica id.
    pub replica_id: String,
    /// Current generation.
    pub generation: u64,
    /// Transaction id at the current generation.
    pub transaction_id: String,
    /// Number of live documents.
    pub document_count: usize,
    /// Number of deletion tombstones.
    pub tombstone_count: usize,
    /// Ids of conflicted documents.
    pub conflicted: Vec<String>,
    /// Pull checkpoints per target replica.
    pub checkpoints: Vec<CheckpointInfo>,
    /// Documents (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<DocumentInfo>>,
}

/// One pull checkpoint.
#[derive(Debug, Serialize)]
pub struct CheckpointInfo {
    /// Target replica id.
    pub target: String,
    /// Target generation applied through.
    pub generation: u64,
    /// Target transaction id at that generation.
    pub transaction_id: String,
}

/// One document.
#[derive(Debug, Serialize)]
pub struct DocumentInfo {
    /// Document id.
    pub id: String,
    /// Current revision.
    pub revision: String,
    /// Generation of the last change.
    pub generation: u64,
    /// True for a tombstone.
    pub deleted: bool,
    /// Revisions of every leaf, current first, when conflicted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<String>,
    /// Current content.
    pub content: Option<Content>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_docs: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let replica = super::open_replica(path)?;
    let checkpoints = FileCheckpointStore::open(&checkpoints_path(path))?;
    let result = inspect(path, &replica, &checkpoints, show_docs)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result of an open replica.
pub fn inspect(
    path: &Path,
    replica: &Replica<Content>,
    checkpoints: &dyn CheckpointStore,
    show_docs: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let replica_id = replica.replica_id();
    let (generation, transaction_id) = replica.current_generation();
    let docs = replica.all_docs(true);
    let tombstone_count = docs.iter().filter(|doc| doc.is_deleted()).count();

    let checkpoints = checkpoints
        .list()?
        .into_iter()
        .filter(|(local, _, _)| *local == replica_id)
        .map(|(_, target, checkpoint)| CheckpointInfo {
            target: target.to_string(),
            generation: checkpoint.generation.value(),
            transaction_id: checkpoint.transaction_id.to_string(),
        })
        .collect();

    let documents = show_docs.then(|| {
        docs.iter()
            .map(|doc| DocumentInfo {
                id: doc.doc_id.to_string(),
                revision: doc.revision().to_string(),
                generation: doc.generation.value(),
                deleted: doc.is_deleted(),
                leaves: if doc.has_conflicts {
                    replica
                        .leaves(&doc.doc_id)
                        .iter()
                        .map(|leaf| leaf.revision().to_string())
                        .collect()
                } else {
                    Vec::new()
                },
                content: doc.content.clone(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        replica_id: replica_id.to_string(),
        generation: generation.value(),
        transaction_id: transaction_id.to_string(),
        document_count: docs.len() - tombstone_count,
        tombstone_count,
        conflicted: replica
            .conflicted_docs()
            .iter()
            .map(ToString::to_string)
            .collect(),
        checkpoints,
        documents,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Replica: {}", result.path);
    println!("  Id:           {}", result.replica_id);
    println!(
        "  Generation:   {} ({})",
        result.generation, result.transaction_id
    );
    println!("  Documents:    {}", result.document_count);
    println!("  Tombstones:   {}", result.tombstone_count);
    println!("  Conflicted:   {}", result.conflicted.len());

    if !result.checkpoints.is_empty() {
        println!();
        println!("Checkpoints:");
        for checkpoint in &result.checkpoints {
            println!(
                "  {}: generation {} ({})",
                checkpoint.target, checkpoint.generation, checkpoint.transaction_id
            );
        }
    }

    if let Some(documents) = &result.documents {
        println!();
        println!("Documents:");
        for doc in documents {
            let state = if doc.deleted { " [deleted]" } else { "" };
            println!("  {} @ {} (generation {}){}", doc.id, doc.revision, doc.generation, state);
            for leaf in doc.leaves.iter().skip(1) {
                println!("    conflict: {leaf}");
            }
            if let Some(content) = &doc.content {
                println!("    {content}");
            }
        }
    }
}
