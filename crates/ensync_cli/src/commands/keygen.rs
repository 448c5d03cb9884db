//! Keygen command implementation.

use ensync_core::crypto::KeyMaterial;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Writes freshly generated key material to `output`.
pub fn run(output: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() && !force {
        return Err(format!("{:?} already exists. Use --force to overwrite.", output).into());
    }

    let keys = KeyMaterial::generate();
    let mut file = fs::File::create(output)?;
    file.write_all(&keys.to_bytes())?;
    file.sync_all()?;

    println!("✓ Key material written to {:?}", output);
    println!("  Keep this file secret; every replica of your documents needs it.");
    Ok(())
}

/// Reads key material written by [`run`].
pub fn load(path: &Path) -> Result<KeyMaterial, Box<dyn std::error::Error>> {
    let bytes = fs::read(path).map_err(|e| format!("Cannot read key file {:?}: {e}", path))?;
    Ok(KeyMaterial::from_bytes(&bytes)?)
}
