//! Request handlers for the four sync target operations.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::registry::{HostedReplica, ReplicaRegistry};
use ensync_core::{Checkpoint, Leaf};
use ensync_protocol::{
    ChangesResponse, GetChangesRequest, Generation, RecordCheckpointRequest,
    RecordCheckpointResponse, RemoteChange, ReplicaId, SendDocumentRequest, SendDocumentResponse,
    SyncInfo, SyncInfoRequest, TransactionId, WireDocument, WireLeaf,
};
use std::sync::Arc;
use tracing::debug;

/// Context shared by all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Hosted replicas.
    pub registry: Arc<ReplicaRegistry>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, registry: Arc<ReplicaRegistry>) -> Self {
        Self { config, registry }
    }
}

/// Handler for sync requests addressed to a named replica.
///
/// Handlers only move envelopes around; they never hold key material.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles `get_sync_info`.
    pub fn handle_sync_info(
        &self,
        name: &str,
        request: &SyncInfoRequest,
    ) -> ServerResult<SyncInfo> {
        let hosted = if request.ensure && self.context.config.allow_autocreate {
            self.context.registry.ensure(name)?
        } else {
            self.context.registry.get(name)?
        };
        let replica = hosted.replica();
        let target_replica = replica.replica_id();

        let (target_generation, target_transaction_id) = replica.current_generation();
        let checked_transaction_id = request
            .checked_generation
            .and_then(|generation| replica.transaction_id_at(generation));
        let (source_generation, source_transaction_id) = hosted
            .checkpoints()
            .get(&target_replica, &request.source_replica)?
            .map_or((Generation::ZERO, TransactionId::empty()), |cp| {
                (cp.generation, cp.transaction_id)
            });

        Ok(SyncInfo {
            target_replica,
            target_generation,
            target_transaction_id,
            checked_transaction_id,
            source_generation,
            source_transaction_id,
        })
    }

    /// Handles `send_document`: applies every leaf with the usual lineage
    /// rule and advances the sender's checkpoint.
    pub fn handle_send_document(
        &self,
        name: &str,
        request: SendDocumentRequest,
    ) -> ServerResult<SendDocumentResponse> {
        let hosted = self.context.registry.get(name)?;
        let SendDocumentRequest {
            source_replica,
            document,
            source_generation,
            source_transaction_id,
        } = request;

        let doc_id = document.doc_id.clone();
        let leaves = document
            .into_leaves()
            .into_iter()
            .map(|leaf| Leaf::new(leaf.lineage, leaf.envelope))
            .collect();
        let result = hosted.replica().put_leaves(&doc_id, leaves)?;
        debug!(replica = name, doc_id = %doc_id, outcome = ?result.outcome, "document received");

        advance_checkpoint(
            &hosted,
            &source_replica,
            Checkpoint::new(source_generation, source_transaction_id),
        )?;

        let (target_generation, target_transaction_id) = hosted.replica().current_generation();
        Ok(SendDocumentResponse {
            outcome: result.outcome,
            target_generation,
            target_transaction_id,
        })
    }

    /// Handles `get_changes`: one page of documents changed after `since`.
    pub fn handle_get_changes(
        &self,
        name: &str,
        request: &GetChangesRequest,
    ) -> ServerResult<ChangesResponse> {
        let hosted = self.context.registry.get(name)?;
        let replica = hosted.replica();
        let max = self.context.config.max_pull_batch.max(1);
        let limit = request.limit.max(1).min(max) as usize;

        let (target_generation, target_transaction_id) = replica.current_generation();
        let records = replica.changes_since(request.since);
        let has_more = records.len() > limit;

        let mut changes = Vec::with_capacity(limit.min(records.len()));
        for record in records.into_iter().take(limit) {
            let mut leaves = replica
                .leaves(&record.doc_id)
                .into_iter()
                .map(|leaf| WireLeaf {
                    lineage: leaf.lineage,
                    envelope: leaf.content,
                });
            let Some(current) = leaves.next() else {
                continue;
            };
            changes.push(RemoteChange {
                generation: record.generation,
                transaction_id: record.transaction_id,
                document: WireDocument {
                    doc_id: record.doc_id,
                    current,
                    conflicts: leaves.collect(),
                },
            });
        }

        Ok(ChangesResponse {
            changes,
            target_generation,
            target_transaction_id,
            has_more,
        })
    }

    /// Handles `record_checkpoint`.
    pub fn handle_record_checkpoint(
        &self,
        name: &str,
        request: &RecordCheckpointRequest,
    ) -> ServerResult<RecordCheckpointResponse> {
        let hosted = self.context.registry.get(name)?;
        let recorded = advance_checkpoint(
            &hosted,
            &request.source_replica,
            Checkpoint::new(request.generation, request.transaction_id.clone()),
        )?;
        Ok(RecordCheckpointResponse { recorded })
    }
}

/// Moves the checkpoint of `source` forward. Never moves it backwards.
fn advance_checkpoint(
    hosted: &HostedReplica,
    source: &ReplicaId,
    checkpoint: Checkpoint,
) -> ServerResult<bool> {
    if checkpoint.generation == Generation::ZERO {
        return Ok(false);
    }
    let local = hosted.replica().replica_id();
    let current = hosted.checkpoints().get(&local, source)?;
    if current.is_some_and(|cp| cp.generation >= checkpoint.generation) {
        return Ok(false);
    }
    hosted.checkpoints().set(&local, source, checkpoint)?;
    Ok(true)
}
