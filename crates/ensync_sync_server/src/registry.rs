//! Named replicas hosted by the server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ensync_core::{
    checkpoints_path, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Replica,
    StoreConfig,
};
use ensync_protocol::EncryptedEnvelope;
use parking_lot::RwLock;
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// A replica as stored by the server: envelopes only, never plaintext.
pub type RemoteReplica = Replica<EncryptedEnvelope>;

/// One hosted replica together with what it knows about its sources.
pub struct HostedReplica {
    replica: RemoteReplica,
    checkpoints: Box<dyn CheckpointStore>,
}

impl HostedReplica {
    /// Creates an in-memory hosted replica.
    pub fn in_memory() -> ServerResult<Self> {
        Ok(Self::new(
            Replica::in_memory()?,
            Box::new(MemoryCheckpointStore::new()),
        ))
    }

    /// Opens or creates a hosted replica in `dir`.
    pub fn open(dir: &Path, sync_on_commit: bool) -> ServerResult<Self> {
        let config = StoreConfig::new().sync_on_commit(sync_on_commit);
        let replica = Replica::open(dir, &config)?;
        let checkpoints = FileCheckpointStore::open(&checkpoints_path(dir))?;
        Ok(Self::new(replica, Box::new(checkpoints)))
    }

    /// Wraps an existing replica and checkpoint store.
    pub fn new(replica: RemoteReplica, checkpoints: Box<dyn CheckpointStore>) -> Self {
        Self {
            replica,
            checkpoints,
        }
    }

    /// Returns the replica.
    pub fn replica(&self) -> &RemoteReplica {
        &self.replica
    }

    /// Returns the checkpoints recorded for source replicas.
    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }
}

/// Validates a replica name: non-empty, at most 128 characters of
/// `[A-Za-z0-9_-]`.
pub fn validate_replica_name(name: &str) -> ServerResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServerError::InvalidRequest(format!(
            "invalid replica name: {name:?}"
        )))
    }
}

/// Registry of hosted replicas by name.
///
/// File-backed registries open replicas lazily from `data_dir/<name>` and
/// keep them open (and locked) for the lifetime of the registry.
pub struct ReplicaRegistry {
    data_dir: Option<PathBuf>,
    sync_on_commit: bool,
    replicas: RwLock<HashMap<String, Arc<HostedReplica>>>,
}

impl ReplicaRegistry {
    /// Creates a registry of in-memory replicas.
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            sync_on_commit: false,
            replicas: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry of replicas stored under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, sync_on_commit: bool) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            sync_on_commit,
            replicas: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the data directory of a file-backed registry.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Returns an existing replica.
    pub fn get(&self, name: &str) -> ServerResult<Arc<HostedReplica>> {
        self.lookup(name, false)
    }

    /// Returns a replica, creating it if it does not exist.
    pub fn ensure(&self, name: &str) -> ServerResult<Arc<HostedReplica>> {
        self.lookup(name, true)
    }

    /// Installs `hosted` under `name`, replacing any previous replica.
    pub fn insert(&self, name: &str, hosted: HostedReplica) -> ServerResult<Arc<HostedReplica>> {
        validate_replica_name(name)?;
        let hosted = Arc::new(hosted);
        self.replicas
            .write()
            .insert(name.to_string(), Arc::clone(&hosted));
        Ok(hosted)
    }

    /// Names of the replicas currently open, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.replicas.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str, create: bool) -> ServerResult<Arc<HostedReplica>> {
        validate_replica_name(name)?;
        if let Some(hosted) = self.replicas.read().get(name) {
            return Ok(Arc::clone(hosted));
        }

        let mut replicas = self.replicas.write();
        if let Some(hosted) = replicas.get(name) {
            return Ok(Arc::clone(hosted));
        }

        let hosted = match &self.data_dir {
            Some(data_dir) => {
                let dir = data_dir.join(name);
                if !create && !dir.is_dir() {
                    return Err(ServerError::ReplicaNotFound(name.to_string()));
                }
                HostedReplica::open(&dir, self.sync_on_commit)?
            }
            None if create => HostedReplica::in_memory()?,
            None => return Err(ServerError::ReplicaNotFound(name.to_string())),
        };

        info!(replica = name, id = %hosted.replica().replica_id(), "replica opened");
        let hosted = Arc::new(hosted);
        replicas.insert(name.to_string(), Arc::clone(&hosted));
        Ok(hosted)
    }
}

impl Default for ReplicaRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}
