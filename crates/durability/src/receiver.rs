//! Received snapshot assembly
//!
//! A [`ChunkReceiver`] owns one in-flight transfer: it stages incoming
//! chunks as files in a private directory and, once the caller decides the
//! transfer is complete, verifies the whole set and hands it to the store.
//!
//! # Integrity
//!
//! - Every chunk carries the sender's combined snapshot checksum. The first
//!   chunk fixes it for the transfer; chunks carrying a different one belong
//!   to another snapshot generation and are rejected.
//! - Every chunk carries its own checksum, recomputed before anything is
//!   written.
//! - [`ChunkReceiver::persist`] re-reads every staged file and recomputes the
//!   combined checksum before the store is touched.
//!
//! # Concurrency
//!
//! `apply`/`persist`/`abort` take `&mut self`; one receiver is driven by one
//! task. Chunk files are opened with `create_new`, so even two receivers
//! pointed at the same directory cannot silently overwrite each other.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapship_core::{ChunkId, ChunkIdError, IdentityParseError, SnapshotChunk, SnapshotIdentity};
use tracing::{debug, error, trace, warn};

use crate::checksum::{chunk_checksum, combined_checksum_of_files, list_snapshot_files};
use crate::store::{PersistedSnapshot, SnapshotStore, StoreError};

/// Result of applying one chunk
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Chunk was validated and written to staging
    Written,
    /// Identical chunk was already staged; nothing written
    Duplicate,
    /// Snapshot is already committed in the store; nothing written
    AlreadyPersisted,
    /// Chunk was not accepted
    Rejected(ChunkRejection),
}

impl ChunkOutcome {
    /// Whether the transfer may proceed past this chunk
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ChunkOutcome::Rejected(_))
    }
}

/// Why a chunk was not accepted
#[derive(Debug, thiserror::Error)]
pub enum ChunkRejection {
    /// Chunk belongs to another snapshot generation
    #[error("snapshot checksum mismatch: transfer expects {expected:#018x}, chunk carries {actual:#018x}")]
    SnapshotChecksumMismatch {
        /// Checksum fixed by the first chunk
        expected: u64,
        /// Checksum carried by this chunk
        actual: u64,
    },

    /// Snapshot id is not a valid identity
    #[error("invalid snapshot id '{snapshot_id}': {source}")]
    InvalidSnapshotId {
        /// Raw snapshot id
        snapshot_id: String,
        /// Parse failure
        #[source]
        source: IdentityParseError,
    },

    /// Chunk names a different snapshot than this transfer
    #[error("chunk for snapshot {actual} sent to transfer of {expected}")]
    IdentityMismatch {
        /// Identity of this transfer
        expected: SnapshotIdentity,
        /// Identity named by the chunk
        actual: SnapshotIdentity,
    },

    /// Content does not match the declared chunk checksum
    #[error("chunk checksum mismatch: declared {expected:#018x}, computed {actual:#018x}")]
    ChunkChecksumMismatch {
        /// Declared checksum
        expected: u64,
        /// Checksum of the received content
        actual: u64,
    },

    /// Chunk name is not usable as a file name
    #[error("invalid chunk name '{name}': {source}")]
    InvalidChunkName {
        /// Raw chunk name
        name: String,
        /// Validation failure
        #[source]
        source: ChunkIdError,
    },

    /// A different chunk with this name is already staged
    #[error("chunk {name} already staged with different content")]
    ConflictingChunk {
        /// Chunk name
        name: ChunkId,
    },

    /// Staging I/O failed
    #[error("staging I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors from [`ChunkReceiver::persist`]
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// No chunk was ever applied
    #[error("No chunks received for snapshot {identity}")]
    NoChunksReceived {
        /// Identity of the transfer
        identity: SnapshotIdentity,
    },

    /// Staging directory is gone
    #[error("Staging directory {path} does not exist")]
    MissingStagingDir {
        /// Staging directory path
        path: PathBuf,
    },

    /// Staged files do not reproduce the sender's snapshot
    #[error("Snapshot checksum mismatch for {identity}: expected {expected:#018x}, calculated {actual:#018x}")]
    SnapshotChecksumMismatch {
        /// Identity of the transfer
        identity: SnapshotIdentity,
        /// Checksum fixed by the first chunk
        expected: u64,
        /// Checksum over the staged files
        actual: u64,
    },

    /// Reading staged files failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Store refused or failed to commit
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Staging state of one snapshot transfer
pub struct ChunkReceiver {
    identity: SnapshotIdentity,
    staging_dir: PathBuf,
    store: Arc<dyn SnapshotStore>,
    expected_snapshot_checksum: Option<u64>,
    expected_next_chunk: Option<ChunkId>,
    sync: bool,
}

impl ChunkReceiver {
    /// Create a receiver staging into `staging_dir`
    ///
    /// The directory is created lazily by the first written chunk. It must
    /// not be shared with any other transfer.
    pub fn new(
        identity: SnapshotIdentity,
        staging_dir: PathBuf,
        store: Arc<dyn SnapshotStore>,
        sync: bool,
    ) -> Self {
        ChunkReceiver {
            identity,
            staging_dir,
            store,
            expected_snapshot_checksum: None,
            expected_next_chunk: None,
            sync,
        }
    }

    /// Identity of the snapshot being received
    pub fn identity(&self) -> &SnapshotIdentity {
        &self.identity
    }

    /// Log index covered by the snapshot being received
    pub fn index(&self) -> u64 {
        self.identity.index()
    }

    /// Staging directory of this transfer
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Combined checksum fixed by the first chunk, if any arrived
    pub fn expected_snapshot_checksum(&self) -> Option<u64> {
        self.expected_snapshot_checksum
    }

    /// Check whether a chunk is already staged
    pub fn contains_chunk(&self, chunk_id: &ChunkId) -> bool {
        self.staging_dir.join(chunk_id.as_str()).exists()
    }

    /// Compare against the sequencing hint set by the caller
    ///
    /// With no hint set, only `None` matches; the caller uses this to detect
    /// the start of a transfer.
    pub fn is_expected_chunk(&self, chunk_id: Option<&ChunkId>) -> bool {
        self.expected_next_chunk.as_ref() == chunk_id
    }

    /// Set the sequencing hint
    pub fn set_next_expected(&mut self, chunk_id: Option<ChunkId>) {
        self.expected_next_chunk = chunk_id;
    }

    /// Apply one chunk, reporting only whether it was accepted
    ///
    /// See [`apply_chunk`](Self::apply_chunk) for the detailed outcome.
    pub fn apply(&mut self, chunk: &SnapshotChunk) -> bool {
        self.apply_chunk(chunk).is_accepted()
    }

    /// Apply one chunk
    ///
    /// Never fails; every problem is reported as [`ChunkOutcome::Rejected`]
    /// and logged.
    pub fn apply_chunk(&mut self, chunk: &SnapshotChunk) -> ChunkOutcome {
        let outcome = self.try_apply(chunk);
        match &outcome {
            ChunkOutcome::Written => trace!(
                target: "snapship::receive",
                snapshot = %self.identity,
                chunk = %chunk.chunk_name,
                "Wrote snapshot chunk"
            ),
            ChunkOutcome::Duplicate => debug!(
                target: "snapship::receive",
                snapshot = %self.identity,
                chunk = %chunk.chunk_name,
                "Snapshot chunk already staged"
            ),
            ChunkOutcome::AlreadyPersisted => debug!(
                target: "snapship::receive",
                snapshot = %self.identity,
                chunk = %chunk.chunk_name,
                "Ignoring snapshot chunk, snapshot already exists"
            ),
            ChunkOutcome::Rejected(reason) => warn!(
                target: "snapship::receive",
                snapshot = %self.identity,
                chunk = %chunk.chunk_name,
                reason = %reason,
                "Rejected snapshot chunk"
            ),
        }
        outcome
    }

    fn try_apply(&mut self, chunk: &SnapshotChunk) -> ChunkOutcome {
        let identity = match chunk.identity() {
            Ok(identity) => identity,
            Err(source) => {
                return ChunkOutcome::Rejected(ChunkRejection::InvalidSnapshotId {
                    snapshot_id: chunk.snapshot_id.clone(),
                    source,
                })
            }
        };
        if identity != self.identity {
            return ChunkOutcome::Rejected(ChunkRejection::IdentityMismatch {
                expected: self.identity,
                actual: identity,
            });
        }

        // only chunks of this snapshot may fix the expected checksum
        let expected = *self
            .expected_snapshot_checksum
            .get_or_insert(chunk.snapshot_checksum);
        if expected != chunk.snapshot_checksum {
            return ChunkOutcome::Rejected(ChunkRejection::SnapshotChecksumMismatch {
                expected,
                actual: chunk.snapshot_checksum,
            });
        }

        if self.store.exists(&identity) {
            return ChunkOutcome::AlreadyPersisted;
        }

        let actual = chunk_checksum(&chunk.content);
        if actual != chunk.checksum {
            return ChunkOutcome::Rejected(ChunkRejection::ChunkChecksumMismatch {
                expected: chunk.checksum,
                actual,
            });
        }

        let chunk_id = match chunk.chunk_id() {
            Ok(id) => id,
            Err(source) => {
                return ChunkOutcome::Rejected(ChunkRejection::InvalidChunkName {
                    name: chunk.chunk_name.clone(),
                    source,
                })
            }
        };

        if let Err(e) = fs::create_dir_all(&self.staging_dir) {
            return ChunkOutcome::Rejected(e.into());
        }

        let path = self.staging_dir.join(chunk_id.as_str());
        if path.exists() {
            return self.check_staged(&path, chunk_id, chunk.checksum);
        }

        // create_new is the real guard; the exists() check above only
        // distinguishes duplicates cheaply
        match self.write_chunk(&path, &chunk.content) {
            Ok(()) => ChunkOutcome::Written,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.check_staged(&path, chunk_id, chunk.checksum)
            }
            Err(e) => ChunkOutcome::Rejected(e.into()),
        }
    }

    /// Compare an already staged file against a re-delivered chunk
    fn check_staged(&self, path: &Path, chunk_id: ChunkId, checksum: u64) -> ChunkOutcome {
        match fs::read(path) {
            Ok(staged) if chunk_checksum(&staged) == checksum => ChunkOutcome::Duplicate,
            Ok(_) => ChunkOutcome::Rejected(ChunkRejection::ConflictingChunk { name: chunk_id }),
            Err(e) => ChunkOutcome::Rejected(e.into()),
        }
    }

    fn write_chunk(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

        let result = file.write_all(content).and_then(|()| {
            if self.sync {
                file.sync_all()
            } else {
                Ok(())
            }
        });

        if let Err(e) = result {
            // we created the file, so a partial write is ours to remove
            drop(file);
            if let Err(cleanup) = fs::remove_file(path) {
                warn!(
                    target: "snapship::receive",
                    path = %path.display(),
                    error = %cleanup,
                    "Failed to remove partially written chunk"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Verify the staged files and commit them to the store
    ///
    /// Every staged file is read back and the combined checksum recomputed
    /// in name order. On mismatch the store is not touched and the transfer
    /// must be aborted and restarted.
    ///
    /// If the snapshot is already committed, the committed record is
    /// returned and the staging directory is discarded.
    pub fn persist(&mut self) -> Result<PersistedSnapshot, ReceiveError> {
        let expected = match self.expected_snapshot_checksum {
            Some(expected) => expected,
            None => {
                return self.store.get(&self.identity).ok_or(ReceiveError::NoChunksReceived {
                    identity: self.identity,
                })
            }
        };

        // committed meanwhile, possibly while chunks were still staged
        if let Some(existing) = self.store.get(&self.identity) {
            self.abort();
            return Ok(existing);
        }

        if !self.staging_dir.is_dir() {
            return Err(ReceiveError::MissingStagingDir {
                path: self.staging_dir.clone(),
            });
        }

        let files = list_snapshot_files(&self.staging_dir)?;
        let actual = combined_checksum_of_files(&files)?;

        if actual != expected {
            error!(
                target: "snapship::receive",
                snapshot = %self.identity,
                expected,
                actual,
                files = files.len(),
                "Snapshot checksum mismatch, refusing to persist"
            );
            return Err(ReceiveError::SnapshotChecksumMismatch {
                identity: self.identity,
                expected,
                actual,
            });
        }

        debug!(
            target: "snapship::receive",
            snapshot = %self.identity,
            files = files.len(),
            "Snapshot verified, committing"
        );
        Ok(self.store.new_snapshot(self.identity, &self.staging_dir)?)
    }

    /// Delete the staging directory
    ///
    /// Best effort: failures are logged, never returned. Safe at any point,
    /// including before the first chunk and after a successful
    /// [`persist`](Self::persist); it only ever touches the staging directory.
    pub fn abort(&mut self) {
        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => debug!(
                target: "snapship::receive",
                snapshot = %self.identity,
                path = %self.staging_dir.display(),
                "Deleted staging directory"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                target: "snapship::receive",
                snapshot = %self.identity,
                path = %self.staging_dir.display(),
                error = %e,
                "Failed to delete staging directory"
            ),
        }
    }
}

impl std::fmt::Debug for ChunkReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReceiver")
            .field("identity", &self.identity)
            .field("staging_dir", &self.staging_dir)
            .field("expected_snapshot_checksum", &self.expected_snapshot_checksum)
            .field("expected_next_chunk", &self.expected_next_chunk)
            .finish()
    }
}
