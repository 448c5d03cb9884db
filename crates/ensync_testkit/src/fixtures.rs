//! Test fixtures for replicas and servers.
//!
//! Provides convenience types for setting up local replicas, sync servers
//! and the targets that connect them.

use ensync_core::crypto::KeyMaterial;
use ensync_core::{
    checkpoints_path, CheckpointStore, Content, FileCheckpointStore, MemoryCheckpointStore,
    Replica, StoreConfig,
};
use ensync_protocol::http::Credentials;
use ensync_protocol::{DocId, ReplicaId};
use ensync_sync_engine::{
    CancelToken, HttpSyncTarget, LoopbackClient, SyncConfig, SyncResult, SyncReport, SyncTarget,
    Synchronizer,
};
use ensync_sync_server::{HostedReplica, ServerConfig, SyncServer};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Sync target type produced by [`TestServer::target`].
pub type LoopbackTarget = HttpSyncTarget<LoopbackClient<Arc<SyncServer>>>;

/// A local replica with its synchronizer and automatic cleanup.
pub struct TestReplica {
    /// The replica.
    pub replica: Arc<Replica<Content>>,
    /// Synchronizer over the replica.
    pub synchronizer: Synchronizer<Replica<Content>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestReplica {
    /// Creates an in-memory replica using `keys`.
    pub fn memory(keys: &KeyMaterial) -> Self {
        let replica = Replica::in_memory().expect("Failed to open in-memory replica");
        Self::assemble(replica, keys, Arc::new(MemoryCheckpointStore::new()), None)
    }

    /// Creates a file-backed replica in a fresh temporary directory.
    pub fn file(keys: &KeyMaterial) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let replica = Replica::open(temp_dir.path(), &StoreConfig::default())
            .expect("Failed to open file replica");
        let checkpoints = FileCheckpointStore::open(&checkpoints_path(temp_dir.path()))
            .expect("Failed to open checkpoint store");
        Self::assemble(replica, keys, Arc::new(checkpoints), Some(temp_dir))
    }

    /// Wraps an existing replica with in-memory checkpoints.
    pub fn from_replica(replica: Replica<Content>, keys: &KeyMaterial) -> Self {
        Self::assemble(replica, keys, Arc::new(MemoryCheckpointStore::new()), None)
    }

    fn assemble(
        replica: Replica<Content>,
        keys: &KeyMaterial,
        checkpoints: Arc<dyn CheckpointStore>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let replica = Arc::new(replica);
        let synchronizer = Synchronizer::new(Arc::clone(&replica), keys.clone(), checkpoints);
        Self {
            replica,
            synchronizer,
            _temp_dir: temp_dir,
        }
    }

    /// Replaces the sync configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.synchronizer = self.synchronizer.with_config(config);
        self
    }

    /// Returns the directory of a file-backed replica.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Returns the replica id.
    pub fn id(&self) -> ReplicaId {
        self.replica.replica_id()
    }

    /// Runs one round with autocreate and a fresh token.
    pub fn sync(&self, target: &dyn SyncTarget) -> SyncResult<SyncReport> {
        self.synchronizer.sync(target, true, &CancelToken::new())
    }

    /// Runs one round with the given token.
    pub fn sync_with(&self, target: &dyn SyncTarget, cancel: &CancelToken) -> SyncResult<SyncReport> {
        self.synchronizer.sync(target, true, cancel)
    }

    /// Creates `count` documents with generated ids.
    pub fn populate(&self, count: usize) -> Vec<DocId> {
        (0..count)
            .map(|i| {
                self.replica
                    .create_doc(json!({"index": i, "body": format!("document {i}")}))
                    .expect("Failed to create document")
                    .doc_id
            })
            .collect()
    }

    /// Current content of every document, tombstones included.
    pub fn snapshot(&self) -> BTreeMap<DocId, Option<Content>> {
        snapshot(&self.replica)
    }
}

/// Current content of every document of `replica`, tombstones included.
pub fn snapshot(replica: &Replica<Content>) -> BTreeMap<DocId, Option<Content>> {
    replica
        .all_docs(true)
        .into_iter()
        .map(|doc| (doc.doc_id, doc.content))
        .collect()
}

/// A sync server reachable through loopback targets.
pub struct TestServer {
    /// The server.
    pub server: Arc<SyncServer>,
    _temp_dir: Option<TempDir>,
}

impl TestServer {
    /// Creates a server hosting in-memory replicas.
    pub fn memory() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a server hosting replicas in a temporary data directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ServerConfig::default()
            .with_data_dir(temp_dir.path())
            .with_sync_on_commit(false);
        Self {
            server: Arc::new(SyncServer::new(config)),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Creates a server with a custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: Arc::new(SyncServer::new(config)),
            _temp_dir: None,
        }
    }

    /// Returns the data directory of a file-backed server.
    pub fn data_dir(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Returns a target for the replica `name`.
    pub fn target(&self, name: &str) -> LoopbackTarget {
        HttpSyncTarget::new(
            "http://testkit.local",
            name,
            LoopbackClient::new(Arc::clone(&self.server)),
        )
    }

    /// Returns a target for `name` that presents `credentials`.
    pub fn target_as(&self, name: &str, credentials: Credentials) -> LoopbackTarget {
        HttpSyncTarget::new(
            "http://testkit.local",
            name,
            LoopbackClient::new(Arc::clone(&self.server)).with_credentials(credentials),
        )
    }

    /// Returns the hosted replica `name`, which must exist.
    pub fn hosted(&self, name: &str) -> Arc<HostedReplica> {
        self.server
            .registry()
            .get(name)
            .expect("Hosted replica should exist")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A server plus `count` replicas sharing one key, all synced once
    /// through `replica_name` after each creates `docs_each` documents.
    pub fn synced_fleet(
        count: usize,
        docs_each: usize,
        replica_name: &str,
    ) -> (TestServer, Vec<TestReplica>) {
        let server = TestServer::memory();
        let keys = KeyMaterial::generate();
        let replicas: Vec<_> = (0..count).map(|_| TestReplica::memory(&keys)).collect();
        let target = server.target(replica_name);

        for replica in &replicas {
            replica.populate(docs_each);
            replica.sync(&target).expect("Initial sync failed");
        }
        // A second pass delivers what later replicas pushed to earlier ones.
        for replica in &replicas {
            replica.sync(&target).expect("Settling sync failed");
        }
        (server, replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fixture_syncs() {
        let server = TestServer::memory();
        let replica = TestReplica::memory(&KeyMaterial::generate());
        replica.populate(3);

        let report = replica.sync(&server.target("notes")).unwrap();
        assert_eq!(report.pushed, 3);
        assert_eq!(server.hosted("notes").replica().doc_count(), 3);
    }

    #[test]
    fn file_fixtures_have_paths() {
        let replica = TestReplica::file(&KeyMaterial::generate());
        assert!(replica.path().unwrap().is_dir());

        let server = TestServer::file();
        replica.populate(1);
        replica.sync(&server.target("notes")).unwrap();
        assert!(server.data_dir().unwrap().join("notes").is_dir());
    }

    #[test]
    fn fleet_converges() {
        let (_server, replicas) = scenarios::synced_fleet(3, 2, "shared");
        let expected = replicas[0].snapshot();
        assert_eq!(expected.len(), 6);
        for replica in &replicas[1..] {
            assert_eq!(replica.snapshot(), expected);
        }
    }
}
