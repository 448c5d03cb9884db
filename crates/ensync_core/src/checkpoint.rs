//! Sync checkpoints.
//!
//! A checkpoint records, for a `(local replica, other replica)` pair, the
//! other replica's generation and transaction id up to which every change
//! has been applied locally. Each update of one pair is atomic.

use crate::dir::write_atomically;
use crate::error::{CoreError, CoreResult};
use ensync_protocol::{Generation, ReplicaId, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CHECKPOINT_MAGIC: &[u8; 8] = b"ENSCKPT\x01";

/// Progress marker of one replica pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Generation of the other replica.
    pub generation: Generation,
    /// Transaction id of the other replica at `generation`.
    pub transaction_id: TransactionId,
}

impl Checkpoint {
    /// Creates a checkpoint.
    pub fn new(generation: Generation, transaction_id: TransactionId) -> Self {
        Self {
            generation,
            transaction_id,
        }
    }
}

/// Persistent map `(local, other) -> Checkpoint`.
pub trait CheckpointStore: Send + Sync {
    /// Returns the checkpoint of a pair.
    fn get(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<Option<Checkpoint>>;

    /// Replaces the checkpoint of a pair atomically.
    fn set(&self, local: &ReplicaId, other: &ReplicaId, checkpoint: Checkpoint) -> CoreResult<()>;

    /// Forgets a pair. Returns true if a checkpoint existed.
    fn remove(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<bool>;

    /// Returns every stored checkpoint ordered by pair.
    fn list(&self) -> CoreResult<Vec<(ReplicaId, ReplicaId, Checkpoint)>>;
}

type CheckpointTable = BTreeMap<(ReplicaId, ReplicaId), Checkpoint>;

fn table_entries(table: &CheckpointTable) -> Vec<(ReplicaId, ReplicaId, Checkpoint)> {
    table
        .iter()
        .map(|((local, other), checkpoint)| (local.clone(), other.clone(), checkpoint.clone()))
        .collect()
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    table: RwLock<CheckpointTable>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<Option<Checkpoint>> {
        Ok(self
            .table
            .read()
            .get(&(local.clone(), other.clone()))
            .cloned())
    }

    fn set(&self, local: &ReplicaId, other: &ReplicaId, checkpoint: Checkpoint) -> CoreResult<()> {
        self.table
            .write()
            .insert((local.clone(), other.clone()), checkpoint);
        Ok(())
    }

    fn remove(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<bool> {
        Ok(self
            .table
            .write()
            .remove(&(local.clone(), other.clone()))
            .is_some())
    }

    fn list(&self) -> CoreResult<Vec<(ReplicaId, ReplicaId, Checkpoint)>> {
        Ok(table_entries(&self.table.read()))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredCheckpoint {
    local: ReplicaId,
    other: ReplicaId,
    checkpoint: Checkpoint,
}

/// Checkpoint store persisted in a single file.
///
/// Every update rewrites the whole table through a temp file and an atomic
/// rename, so a crash leaves either the previous or the new table.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    table: RwLock<CheckpointTable>,
}

impl FileCheckpointStore {
    /// Opens the table at `path`, creating an empty one if it doesn't exist.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let table = if path.exists() {
            decode_table(&fs::read(path)?)?
        } else {
            CheckpointTable::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            table: RwLock::new(table),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &CheckpointTable) -> CoreResult<()> {
        write_atomically(&self.path, &encode_table(table)?)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<Option<Checkpoint>> {
        Ok(self
            .table
            .read()
            .get(&(local.clone(), other.clone()))
            .cloned())
    }

    fn set(&self, local: &ReplicaId, other: &ReplicaId, checkpoint: Checkpoint) -> CoreResult<()> {
        let mut table = self.table.write();
        let mut updated = table.clone();
        updated.insert((local.clone(), other.clone()), checkpoint.clone());
        self.persist(&updated)?;
        *table = updated;

        debug!(
            local = %local,
            other = %other,
            generation = %checkpoint.generation,
            "checkpoint stored"
        );
        Ok(())
    }

    fn remove(&self, local: &ReplicaId, other: &ReplicaId) -> CoreResult<bool> {
        let mut table = self.table.write();
        let key = (local.clone(), other.clone());
        if !table.contains_key(&key) {
            return Ok(false);
        }
        let mut updated = table.clone();
        updated.remove(&key);
        self.persist(&updated)?;
        *table = updated;
        Ok(true)
    }

    fn list(&self) -> CoreResult<Vec<(ReplicaId, ReplicaId, Checkpoint)>> {
        Ok(table_entries(&self.table.read()))
    }
}

fn encode_table(table: &CheckpointTable) -> CoreResult<Vec<u8>> {
    let stored: Vec<StoredCheckpoint> = table
        .iter()
        .map(|((local, other), checkpoint)| StoredCheckpoint {
            local: local.clone(),
            other: other.clone(),
            checkpoint: checkpoint.clone(),
        })
        .collect();

    let mut buf = CHECKPOINT_MAGIC.to_vec();
    ciborium::ser::into_writer(&stored, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

fn decode_table(data: &[u8]) -> CoreResult<CheckpointTable> {
    let body = data
        .strip_prefix(CHECKPOINT_MAGIC.as_slice())
        .ok_or_else(|| CoreError::invalid_format("not an ensync checkpoint table"))?;
    let stored: Vec<StoredCheckpoint> =
        ciborium::de::from_reader(body).map_err(|e| CoreError::codec(e.to_string()))?;

    Ok(stored
        .into_iter()
        .map(|entry| ((entry.local, entry.other), entry.checkpoint))
        .collect())
}
