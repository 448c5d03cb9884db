//! The synchronizer: one push-then-pull round against a sync target.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ensync_core::crypto::{CryptoCodec, KeyMaterial};
use ensync_core::{Checkpoint, CheckpointStore, Content, DocumentStore, Leaf};
use ensync_protocol::{
    DocId, GetChangesRequest, Generation, PutOutcome, RecordCheckpointRequest, RemoteChange,
    ReplicaId, SendDocumentRequest, SyncInfo, SyncInfoRequest, TransactionId, WireDocument,
    WireLeaf,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::PairLocks;
use crate::target::SyncTarget;

/// Which replica registered a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    /// A pulled revision was concurrent with a local one.
    Local,
    /// A pushed revision was concurrent with one held by the target.
    Target,
}

/// A conflict registered during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    /// The conflicted document.
    pub doc_id: DocId,
    /// Where the conflict was registered.
    pub side: ConflictSide,
}

/// Result of a completed sync round.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Local generation after the pulled changes were applied.
    pub local_generation: Generation,
    /// Id of the target replica.
    pub target_replica: ReplicaId,
    /// Documents sent to the target.
    pub pushed: u64,
    /// Pulled changes that modified the local replica.
    pub pulled: u64,
    /// Conflicts registered on either side.
    pub conflicts: Vec<ConflictReport>,
    /// Duration of the round.
    pub duration: Duration,
}

/// Statistics accumulated over all rounds of a synchronizer.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Rounds that completed.
    pub rounds_completed: u64,
    /// Rounds that failed or were cancelled.
    pub rounds_failed: u64,
    /// Documents pushed by completed rounds.
    pub documents_pushed: u64,
    /// Changes pulled by completed rounds.
    pub documents_pulled: u64,
    /// Conflicts reported by completed rounds.
    pub conflicts: u64,
    /// End of the last completed round.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Pull progress that survives an interrupted pull.
#[derive(Default)]
struct PullProgress {
    /// Target position of the last fully applied change.
    applied_through: Option<Checkpoint>,
    /// Local generations whose document now equals the target's copy.
    mirrored: BTreeSet<Generation>,
}

/// Drives sync rounds between a local document store and sync targets.
///
/// Key material is supplied at construction and used for every target;
/// the synchronizer never handles credentials, which belong to the target.
///
/// # Round
///
/// 1. Ask the target for its position and what it knows about us
/// 2. Check both sides for divergence against the transaction ids
/// 3. Push every local change the target has not seen, encrypted
/// 4. Pull every target change after our checkpoint, decrypted
/// 5. Commit the pull checkpoint, then tell the target which local
///    generations it already mirrors
///
/// Push completes before pull starts, so a round delivers the local state
/// first and then reads back the merged state of the target.
pub struct Synchronizer<S: DocumentStore> {
    store: Arc<S>,
    codec: CryptoCodec,
    checkpoints: Arc<dyn CheckpointStore>,
    config: SyncConfig,
    locks: PairLocks,
    stats: RwLock<SyncStats>,
}

impl<S: DocumentStore> Synchronizer<S> {
    /// Creates a synchronizer for `store`.
    ///
    /// Also keys the revisions `store` mints with `keys`, so revision hashes
    /// sent to targets carry no plain content hash. Documents should be
    /// written only after this.
    pub fn new(store: Arc<S>, keys: KeyMaterial, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        store.set_revision_key(keys.revision_key());
        Self {
            store,
            codec: CryptoCodec::new(keys),
            checkpoints,
            config: SyncConfig::default(),
            locks: PairLocks::new(),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a lock set with other synchronizers of the same replica.
    pub fn with_locks(mut self, locks: PairLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the pull checkpoint for a target replica.
    pub fn checkpoint(&self, target: &ReplicaId) -> SyncResult<Option<Checkpoint>> {
        Ok(self.checkpoints.get(&self.store.replica_id(), target)?)
    }

    /// Discards the pull checkpoint for a target replica.
    ///
    /// After a [`SyncError::ReplicaDivergence`] caused by a rebuilt target,
    /// this makes the next round pull everything from generation zero.
    /// Returns true if a checkpoint existed.
    pub fn reset_checkpoint(&self, target: &ReplicaId) -> SyncResult<bool> {
        let local = self.store.replica_id();
        if self.locks.is_held(&local, target) {
            return Err(SyncError::SyncInProgress {
                local,
                target: target.clone(),
            });
        }
        let removed = self.checkpoints.remove(&local, target)?;
        info!(local = %local, target = %target, removed, "pull checkpoint reset");
        Ok(removed)
    }

    /// Runs one sync round.
    ///
    /// With `autocreate`, a target replica that does not exist yet is created.
    /// Returns after both phases complete; the report carries the new local
    /// generation.
    ///
    /// # Errors
    ///
    /// Any error aborts the round without committing a new pull checkpoint,
    /// except cancellation during pull, which commits the checkpoint at the
    /// last fully applied change before returning [`SyncError::Cancelled`].
    /// Documents already applied stay applied; a retried round skips them.
    pub fn sync<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        autocreate: bool,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let result = self.run_round(target, autocreate, cancel, start);

        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.rounds_completed += 1;
                stats.documents_pushed += report.pushed;
                stats.documents_pulled += report.pulled;
                stats.conflicts += report.conflicts.len() as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => {
                stats.rounds_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    fn run_round<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        autocreate: bool,
        cancel: &CancelToken,
        start: Instant,
    ) -> SyncResult<SyncReport> {
        cancel.check()?;
        let local_id = self.store.replica_id();

        let info = target.get_sync_info(&SyncInfoRequest::new(local_id.clone(), autocreate))?;
        let target_id = info.target_replica.clone();
        let _guard = self.locks.try_acquire(&local_id, &target_id)?;

        info!(
            local = %local_id,
            target = %target_id,
            target_generation = %info.target_generation,
            known_generation = %info.source_generation,
            "sync round started"
        );

        self.check_source_knowledge(&info)?;
        let checkpoint = self.checkpoints.get(&local_id, &target_id)?;
        self.check_pull_checkpoint(target, &local_id, &info, checkpoint.as_ref())?;

        let mut report = SyncReport {
            local_generation: Generation::ZERO,
            target_replica: target_id.clone(),
            pushed: 0,
            pulled: 0,
            conflicts: Vec::new(),
            duration: Duration::ZERO,
        };

        let known = self.push(target, &local_id, &info, cancel, &mut report)?;

        let since = checkpoint.map_or(Generation::ZERO, |cp| cp.generation);
        let mut progress = PullProgress::default();
        match self.pull(target, &local_id, since, cancel, &mut progress, &mut report) {
            Ok(()) => {}
            Err(SyncError::Cancelled) => {
                self.commit_checkpoint(&local_id, &target_id, progress.applied_through)?;
                info!(local = %local_id, target = %target_id, "sync round cancelled during pull");
                return Err(SyncError::Cancelled);
            }
            Err(e) => return Err(e),
        }
        self.commit_checkpoint(&local_id, &target_id, progress.applied_through)?;

        self.advance_target_knowledge(target, &local_id, known, &progress.mirrored)?;

        let (local_generation, _) = self.store.current_generation()?;
        report.local_generation = local_generation;
        report.duration = start.elapsed();

        info!(
            local = %local_id,
            target = %target_id,
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts = report.conflicts.len(),
            generation = %local_generation,
            "sync round completed"
        );
        Ok(report)
    }

    /// Checks that what the target remembers about us is still our history.
    fn check_source_knowledge(&self, info: &SyncInfo) -> SyncResult<()> {
        if info.source_generation == Generation::ZERO {
            return Ok(());
        }

        let (local_generation, _) = self.store.current_generation()?;
        if info.source_generation > local_generation {
            warn!(target = %info.target_replica, "target knows a future of this replica");
            return Err(SyncError::divergence(
                &info.target_replica,
                format!(
                    "target knows generation {} of this replica, which is at {}",
                    info.source_generation, local_generation
                ),
            ));
        }

        match self.store.transaction_id_at(info.source_generation)? {
            Some(txid) if txid == info.source_transaction_id => Ok(()),
            _ => {
                warn!(target = %info.target_replica, "local history differs from the target's record");
                Err(SyncError::divergence(
                    &info.target_replica,
                    format!(
                        "local transaction id at generation {} differs from the target's record",
                        info.source_generation
                    ),
                ))
            }
        }
    }

    /// Checks that our pull checkpoint still names the target's history.
    fn check_pull_checkpoint<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        local_id: &ReplicaId,
        info: &SyncInfo,
        checkpoint: Option<&Checkpoint>,
    ) -> SyncResult<()> {
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        if checkpoint.generation == Generation::ZERO {
            return Ok(());
        }

        let target_txid = if checkpoint.generation > info.target_generation {
            return Err(SyncError::divergence(
                &info.target_replica,
                format!(
                    "checkpoint at generation {} but target is at {}",
                    checkpoint.generation, info.target_generation
                ),
            ));
        } else if checkpoint.generation == info.target_generation {
            Some(info.target_transaction_id.clone())
        } else {
            let request =
                SyncInfoRequest::new(local_id.clone(), false).checking(checkpoint.generation);
            target.get_sync_info(&request)?.checked_transaction_id
        };

        if target_txid.as_ref() != Some(&checkpoint.transaction_id) {
            warn!(
                target = %info.target_replica,
                generation = %checkpoint.generation,
                "target transaction id changed since the last sync"
            );
            return Err(SyncError::divergence(
                &info.target_replica,
                format!(
                    "target transaction id at generation {} no longer matches the checkpoint",
                    checkpoint.generation
                ),
            ));
        }
        Ok(())
    }

    /// Sends every document changed after the target's knowledge of us.
    ///
    /// Returns the local position the target knows after the push.
    fn push<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        local_id: &ReplicaId,
        info: &SyncInfo,
        cancel: &CancelToken,
        report: &mut SyncReport,
    ) -> SyncResult<(Generation, TransactionId)> {
        let mut known = (info.source_generation, info.source_transaction_id.clone());

        for change in self.store.changes_since(info.source_generation)? {
            cancel.check()?;

            let Some(document) = self.encode_document(&change.doc_id)? else {
                continue;
            };
            let request = SendDocumentRequest {
                source_replica: local_id.clone(),
                document,
                source_generation: change.generation,
                source_transaction_id: change.transaction_id.clone(),
            };
            let response = target.send_document(&request)?;

            debug!(doc_id = %change.doc_id, generation = %change.generation, outcome = ?response.outcome, "pushed document");
            report.pushed += 1;
            if response.outcome == PutOutcome::Conflicted {
                report.conflicts.push(ConflictReport {
                    doc_id: change.doc_id.clone(),
                    side: ConflictSide::Target,
                });
            }
            known = (change.generation, change.transaction_id);
        }

        Ok(known)
    }

    /// Encrypts every leaf of a local document.
    fn encode_document(&self, doc_id: &DocId) -> SyncResult<Option<WireDocument>> {
        let mut leaves = self
            .store
            .leaves(doc_id)?
            .into_iter()
            .map(|leaf| self.encode_leaf(doc_id, leaf));

        let Some(current) = leaves.next().transpose()? else {
            return Ok(None);
        };
        let conflicts = leaves.collect::<SyncResult<Vec<_>>>()?;

        Ok(Some(WireDocument {
            doc_id: doc_id.clone(),
            current,
            conflicts,
        }))
    }

    fn encode_leaf(&self, doc_id: &DocId, leaf: Leaf<Content>) -> SyncResult<WireLeaf> {
        let envelope = leaf
            .content
            .as_ref()
            .map(|content| self.codec.encrypt(doc_id, &leaf.lineage.head, content))
            .transpose()?;
        Ok(WireLeaf {
            lineage: leaf.lineage,
            envelope,
        })
    }

    /// Applies target changes after `since` in ascending generation order.
    fn pull<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        local_id: &ReplicaId,
        since: Generation,
        cancel: &CancelToken,
        progress: &mut PullProgress,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut since = since;

        loop {
            let request =
                GetChangesRequest::new(local_id.clone(), since, self.config.pull_batch_size);
            let response = target.get_changes(&request)?;
            let page_len = response.changes.len();

            for change in response.changes {
                cancel.check()?;

                if change.generation <= since {
                    return Err(SyncError::Protocol(format!(
                        "change at generation {} does not follow {since}",
                        change.generation
                    )));
                }
                since = change.generation;
                self.apply_change(change, progress, report)?;
            }

            if !response.has_more || page_len == 0 {
                return Ok(());
            }
        }
    }

    /// Decrypts and applies one pulled document. All leaves are verified
    /// before anything is written.
    fn apply_change(
        &self,
        change: RemoteChange,
        progress: &mut PullProgress,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let RemoteChange {
            generation,
            transaction_id,
            document,
        } = change;
        let doc_id = document.doc_id.clone();
        let remote_revisions = document.revisions();

        let leaves = document
            .into_leaves()
            .into_iter()
            .map(|leaf| self.decode_leaf(&doc_id, leaf))
            .collect::<SyncResult<Vec<_>>>()?;

        let result = self.store.put(&doc_id, leaves)?;
        debug!(doc_id = %doc_id, remote_generation = %generation, outcome = ?result.outcome, "pulled document");

        if let Some(local_generation) = result.generation {
            report.pulled += 1;
            if result.leaves.is_subset(&remote_revisions) {
                progress.mirrored.insert(local_generation);
            }
            if result.outcome == PutOutcome::Conflicted {
                report.conflicts.push(ConflictReport {
                    doc_id,
                    side: ConflictSide::Local,
                });
            }
        }

        progress.applied_through = Some(Checkpoint::new(generation, transaction_id));
        Ok(())
    }

    fn decode_leaf(&self, doc_id: &DocId, leaf: WireLeaf) -> SyncResult<Leaf<Content>> {
        let content = leaf
            .envelope
            .as_ref()
            .map(|envelope| self.codec.decrypt(doc_id, &leaf.lineage.head, envelope))
            .transpose()?;
        Ok(Leaf::new(leaf.lineage, content))
    }

    fn commit_checkpoint(
        &self,
        local_id: &ReplicaId,
        target_id: &ReplicaId,
        checkpoint: Option<Checkpoint>,
    ) -> SyncResult<()> {
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        debug!(
            target = %target_id,
            generation = %checkpoint.generation,
            "committing pull checkpoint"
        );
        self.checkpoints.set(local_id, target_id, checkpoint)?;
        Ok(())
    }

    /// Tells the target it already holds the local generations produced by
    /// mirroring its own documents, so the next round does not push them back.
    ///
    /// The watermark only advances over a contiguous run of mirrored
    /// generations; a local write in between stops it.
    fn advance_target_knowledge<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        local_id: &ReplicaId,
        known: (Generation, TransactionId),
        mirrored: &BTreeSet<Generation>,
    ) -> SyncResult<()> {
        let (known_generation, _) = known;
        let (current, _) = self.store.current_generation()?;

        let mut watermark = known_generation;
        while watermark < current && mirrored.contains(&watermark.next()) {
            watermark = watermark.next();
        }
        if watermark == known_generation {
            return Ok(());
        }

        let Some(transaction_id) = self.store.transaction_id_at(watermark)? else {
            return Ok(());
        };
        target.record_checkpoint(&RecordCheckpointRequest {
            source_replica: local_id.clone(),
            generation: watermark,
            transaction_id,
        })?;
        debug!(generation = %watermark, "target knowledge advanced");
        Ok(())
    }
}

impl<S: DocumentStore> std::fmt::Debug for Synchronizer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("replica_id", &self.store.replica_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
