//! Sync command implementation.
//!
//! Syncs a local replica with a named replica hosted in a server data
//! directory on the same machine. Requests go through the loopback HTTP
//! client, so the round takes exactly the path it takes against a remote
//! server.

use ensync_core::crypto::KeyMaterial;
use ensync_core::{checkpoints_path, CheckpointStore, Content, FileCheckpointStore, Replica};
use ensync_sync_engine::{
    retry_sync, CancelToken, ConflictSide, HttpSyncTarget, LoopbackClient, RetryConfig,
    SyncConfig, SyncReport, Synchronizer,
};
use ensync_sync_server::{ServerConfig, SyncServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options of the sync command.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Server data directory.
    pub server_dir: PathBuf,
    /// Name of the remote replica.
    pub replica: String,
    /// Key material file.
    pub keys: PathBuf,
    /// Create the remote replica if missing.
    pub autocreate: bool,
    /// Documents per pull request.
    pub batch_size: u32,
    /// Attempts for transient failures.
    pub attempts: u32,
    /// Overall deadline.
    pub timeout: Option<Duration>,
}

/// Runs the sync command.
pub fn run(path: &Path, options: &SyncOptions) -> Result<(), Box<dyn std::error::Error>> {
    let keys = super::keygen::load(&options.keys)?;
    let replica = Arc::new(super::open_replica(path)?);
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::open(&checkpoints_path(path))?);

    let report = sync_with_server_dir(replica, keys, checkpoints, options)?;
    print_report(&report);
    Ok(())
}

/// Runs one sync round (with retries) against a server data directory.
pub fn sync_with_server_dir(
    replica: Arc<Replica<Content>>,
    keys: KeyMaterial,
    checkpoints: Arc<dyn CheckpointStore>,
    options: &SyncOptions,
) -> Result<SyncReport, Box<dyn std::error::Error>> {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default()
            .with_data_dir(&options.server_dir)
            .with_autocreate(options.autocreate),
    ));
    let base_url = format!("file://{}", options.server_dir.display());
    let target = HttpSyncTarget::new(base_url, &options.replica, LoopbackClient::new(server));

    let retry = RetryConfig::new(options.attempts);
    let config = SyncConfig::new()
        .with_pull_batch_size(options.batch_size)
        .with_retry(retry.clone());
    let synchronizer = Synchronizer::new(replica, keys, checkpoints).with_config(config);

    let cancel = match options.timeout {
        Some(timeout) => CancelToken::with_timeout(timeout),
        None => CancelToken::new(),
    };

    info!(replica = %options.replica, server_dir = %options.server_dir.display(), "syncing");
    let report = retry_sync(&retry, &cancel, || {
        synchronizer.sync(&target, options.autocreate, &cancel)
    })?;
    Ok(report)
}

fn print_report(report: &SyncReport) {
    println!("✓ Sync completed with {}", report.target_replica);
    println!("  Pushed: {}", report.pushed);
    println!("  Pulled: {}", report.pulled);
    println!("  Local generation: {}", report.local_generation);
    println!("  Duration: {:?}", report.duration);

    for conflict in &report.conflicts {
        let side = match conflict.side {
            ConflictSide::Local => "local",
            ConflictSide::Target => "remote",
        };
        println!("  ! Conflict on {} ({side})", conflict.doc_id);
    }
}
