//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of changes returned per `get_changes` page.
    pub max_pull_batch: u32,
    /// Whether `get_sync_info` with `ensure` may create missing replicas.
    pub allow_autocreate: bool,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens.
    pub token_expiry: Duration,
    /// Directory holding one subdirectory per replica; `None` keeps
    /// replicas in memory.
    pub data_dir: Option<PathBuf>,
    /// Whether hosted replicas fsync their journal on every commit.
    pub sync_on_commit: bool,
}

impl ServerConfig {
    /// Creates a configuration for in-memory replicas.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            allow_autocreate: true,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            data_dir: None,
            sync_on_commit: true,
        }
    }

    /// Sets the maximum pull batch size. Zero is treated as one.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size.max(1);
        self
    }

    /// Allows or forbids creating replicas on demand.
    pub fn with_autocreate(mut self, allow: bool) -> Self {
        self.allow_autocreate = allow;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the lifetime of issued tokens.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Stores replicas under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets whether hosted replicas fsync on every commit.
    pub fn with_sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_pull_batch, 100);
        assert!(config.allow_autocreate);
        assert!(!config.require_auth);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_pull_batch(50)
            .with_autocreate(false)
            .with_auth(vec![1, 2, 3, 4])
            .with_data_dir("/var/lib/ensync");

        assert_eq!(config.max_pull_batch, 50);
        assert!(!config.allow_autocreate);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/ensync")));
    }
}
