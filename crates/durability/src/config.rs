//! Snapshot store configuration

use std::path::{Path, PathBuf};

/// Snapshot store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the store
    pub root: PathBuf,
    /// fsync chunk files, commit markers and directories (default: true)
    pub sync: bool,
    /// Committed snapshots kept after a new one is published (default: 1)
    pub max_retained: usize,
}

impl StoreConfig {
    /// Create config with durable defaults
    pub fn new(root: impl AsRef<Path>) -> Self {
        StoreConfig {
            root: root.as_ref().to_path_buf(),
            sync: true,
            max_retained: 1,
        }
    }

    /// Create config for testing
    ///
    /// Skips fsync for faster tests.
    pub fn for_testing(root: impl AsRef<Path>) -> Self {
        StoreConfig {
            sync: false,
            ..Self::new(root)
        }
    }

    /// Enable or disable fsync
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set how many committed snapshots are kept
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }
        if self.max_retained == 0 {
            return Err(ConfigError::InvalidMaxRetained(self.max_retained));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Root directory not set
    #[error("Store root directory is empty")]
    EmptyRoot,

    /// Retention must keep at least the newest snapshot
    #[error("Invalid max_retained {0}: must be at least 1")]
    InvalidMaxRetained(usize),
}
