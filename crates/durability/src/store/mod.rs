//! Durable snapshot catalog
//!
//! The [`SnapshotStore`] trait is the contract a [`ChunkReceiver`] relies on:
//! an existence query and an atomic promotion of a staging directory into a
//! committed, queryable snapshot. [`FileSnapshotStore`] is the file-backed
//! implementation.
//!
//! [`ChunkReceiver`]: crate::receiver::ChunkReceiver

mod file;
mod persisted;

pub use file::FileSnapshotStore;
pub use persisted::{PersistedSnapshot, SnapshotMarker};

use std::path::{Path, PathBuf};

use snapship_core::{ChunkIdError, SnapshotIdentity};

use crate::config::ConfigError;

/// Catalog of committed snapshots
pub trait SnapshotStore: Send + Sync {
    /// Check whether a snapshot with this identity is committed
    fn exists(&self, identity: &SnapshotIdentity) -> bool;

    /// Look up a committed snapshot
    fn get(&self, identity: &SnapshotIdentity) -> Option<PersistedSnapshot>;

    /// Promote a staging directory into a committed snapshot
    ///
    /// Takes ownership of the directory's contents. On success the snapshot
    /// is immediately visible through [`exists`](Self::exists) and
    /// [`get`](Self::get). Retention of older snapshots is up to the store.
    fn new_snapshot(
        &self,
        identity: SnapshotIdentity,
        staging_dir: &Path,
    ) -> Result<PersistedSnapshot, StoreError>;
}

/// Observer of newly committed snapshots
///
/// Used by the log to compact against the latest snapshot.
pub trait SnapshotListener: Send + Sync {
    /// Called once per published snapshot, after it became queryable
    ///
    /// Calls arrive in publish order, one at a time, with the store's
    /// publish lock held. Implementations must not commit into the same
    /// store from this callback.
    fn on_new_snapshot(&self, snapshot: &PersistedSnapshot);
}

/// Errors from the snapshot store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid store config: {0}")]
    Config(#[from] ConfigError),

    /// Staging directory handed to the store does not exist
    #[error("Staging directory {path} does not exist")]
    MissingStagingDir {
        /// Staging directory path
        path: PathBuf,
    },

    /// A newer snapshot is already committed
    #[error("Snapshot {identity} is older than committed snapshot {latest}")]
    Superseded {
        /// Identity that was offered
        identity: SnapshotIdentity,
        /// Newest committed identity
        latest: SnapshotIdentity,
    },

    /// Files on disk do not reproduce the recorded checksum
    #[error("Checksum mismatch for snapshot {identity}: expected {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch {
        /// Snapshot identity
        identity: SnapshotIdentity,
        /// Recorded checksum
        expected: u64,
        /// Recomputed checksum
        actual: u64,
    },

    /// Commit marker missing
    #[error("Missing commit marker {path}")]
    MissingMarker {
        /// Expected marker path
        path: PathBuf,
    },

    /// Commit marker unreadable or inconsistent
    #[error("Corrupt commit marker {path}: {reason}")]
    CorruptMarker {
        /// Marker path
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// A committed file name is not a valid chunk name
    #[error("Invalid chunk name '{name}' in snapshot {identity}: {source}")]
    InvalidChunkName {
        /// Snapshot identity
        identity: SnapshotIdentity,
        /// Offending file name
        name: String,
        /// Validation failure
        #[source]
        source: ChunkIdError,
    },
}
