//! Replica configuration.

/// Configuration for opening a replica.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the replica directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the replica already exists.
    pub error_if_exists: bool,

    /// Whether to fsync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the replica if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the replica exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to fsync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
