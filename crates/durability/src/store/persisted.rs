//! Committed snapshot record and its commit marker

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snapship_core::SnapshotIdentity;

use super::StoreError;
use crate::checksum::{combined_checksum_of_files, list_snapshot_files};

/// Committed snapshot
///
/// Immutable once returned by the store. The record stays valid after the
/// store retires the snapshot, but its files may be gone by then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSnapshot {
    identity: SnapshotIdentity,
    path: PathBuf,
    checksum: u64,
}

impl PersistedSnapshot {
    /// Create a record for a committed snapshot directory
    pub fn new(identity: SnapshotIdentity, path: PathBuf, checksum: u64) -> Self {
        PersistedSnapshot {
            identity,
            path,
            checksum,
        }
    }

    /// Snapshot identity
    pub fn identity(&self) -> &SnapshotIdentity {
        &self.identity
    }

    /// Index of the last log entry covered
    pub fn index(&self) -> u64 {
        self.identity.index()
    }

    /// Term of the last log entry covered
    pub fn term(&self) -> u64 {
        self.identity.term()
    }

    /// Snapshot directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Combined checksum recorded at commit time
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Snapshot files, sorted by name
    pub fn files(&self) -> io::Result<Vec<PathBuf>> {
        list_snapshot_files(&self.path)
    }

    /// Re-read every file and compare against the recorded checksum
    pub fn verify(&self) -> Result<(), StoreError> {
        let actual = combined_checksum_of_files(&self.files()?)?;
        if actual != self.checksum {
            return Err(StoreError::ChecksumMismatch {
                identity: self.identity,
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Commit marker written next to a committed snapshot directory
///
/// The marker is written after the directory is in place; a directory
/// without a marker never became part of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMarker {
    /// Snapshot identity
    pub identity: SnapshotIdentity,
    /// Combined checksum of the snapshot files
    pub checksum: u64,
    /// Number of files in the snapshot
    pub files: usize,
}
