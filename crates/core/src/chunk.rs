//! Snapshot chunk message
//!
//! One fragment of a snapshot as it arrives from the transport. Fields are
//! kept in their wire form; the receiver validates the snapshot id and the
//! chunk name before acting on them.

use serde::{Deserialize, Serialize};

use crate::chunk_id::{ChunkId, ChunkIdError};
use crate::identity::{IdentityParseError, SnapshotIdentity};

/// One chunk of a snapshot transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChunk {
    /// Text form of the snapshot identity this chunk belongs to
    pub snapshot_id: String,
    /// Name of the chunk, used as the staged file name
    pub chunk_name: String,
    /// Sender's combined checksum over the whole snapshot
    pub snapshot_checksum: u64,
    /// Checksum over `content` only
    pub checksum: u64,
    /// Chunk bytes
    pub content: Vec<u8>,
}

impl SnapshotChunk {
    /// Parse the snapshot identity carried by this chunk
    pub fn identity(&self) -> Result<SnapshotIdentity, IdentityParseError> {
        self.snapshot_id.parse()
    }

    /// Validate the chunk name
    pub fn chunk_id(&self) -> Result<ChunkId, ChunkIdError> {
        ChunkId::new(self.chunk_name.as_str())
    }
}
