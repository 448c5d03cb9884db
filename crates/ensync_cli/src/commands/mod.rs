//! CLI command implementations.

pub mod init;
pub mod inspect;
pub mod keygen;
pub mod put;
pub mod resolve;
pub mod sync;

use ensync_core::{Content, Replica, StoreConfig};
use std::path::Path;

/// Opens an existing local replica.
pub fn open_replica(path: &Path) -> Result<Replica<Content>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No replica found at {:?}", path).into());
    }
    let config = StoreConfig::new().create_if_missing(false);
    Ok(Replica::open(path, &config)?)
}

/// Opens an existing local replica for editing.
///
/// Edits mint revisions that are later synced, so their digests are keyed
/// with the key material in `keys`.
pub fn open_replica_for_edit(
    path: &Path,
    keys: &Path,
) -> Result<Replica<Content>, Box<dyn std::error::Error>> {
    let keys = keygen::load(keys)?;
    Ok(open_replica(path)?.with_revision_key(keys.revision_key()))
}
