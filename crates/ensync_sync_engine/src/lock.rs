//! Per replica-pair exclusion of sync rounds.

use std::collections::HashSet;
use std::sync::Arc;

use ensync_protocol::ReplicaId;
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

type Pair = (ReplicaId, ReplicaId);

/// Set of replica pairs with a round in flight.
///
/// Clones share the set, so synchronizers that should exclude each other
/// are built with the same `PairLocks`.
#[derive(Debug, Clone, Default)]
pub struct PairLocks {
    active: Arc<Mutex<HashSet<Pair>>>,
}

impl PairLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pair, failing fast if a round already holds it.
    pub fn try_acquire(&self, local: &ReplicaId, target: &ReplicaId) -> SyncResult<PairGuard> {
        let pair = (local.clone(), target.clone());
        if !self.active.lock().insert(pair.clone()) {
            return Err(SyncError::SyncInProgress {
                local: local.clone(),
                target: target.clone(),
            });
        }
        Ok(PairGuard {
            active: Arc::clone(&self.active),
            pair,
        })
    }

    /// Returns true if a round holds the pair.
    pub fn is_held(&self, local: &ReplicaId, target: &ReplicaId) -> bool {
        self.active
            .lock()
            .contains(&(local.clone(), target.clone()))
    }
}

/// Releases its pair when dropped.
#[derive(Debug)]
pub struct PairGuard {
    active: Arc<Mutex<HashSet<Pair>>>,
    pair: Pair,
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.pair);
    }
}
