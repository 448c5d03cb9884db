//! Init command implementation.

use ensync_core::{Content, Replica, StoreConfig};
use std::path::Path;
use tracing::info;

/// Creates a new local replica at `path`.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = StoreConfig::new().error_if_exists(true);
    let replica: Replica<Content> = Replica::open(path, &config)?;
    info!(path = %path.display(), "replica created");

    println!("✓ Replica created");
    println!("  Path: {}", path.display());
    println!("  Replica id: {}", replica.replica_id());

    Ok(())
}
