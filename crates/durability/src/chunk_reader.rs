//! Sender-side chunk reader
//!
//! Streams a committed snapshot as [`SnapshotChunk`]s, one per file, in
//! file name order. Files are read lazily, one per `next()`.

use std::path::PathBuf;

use snapship_core::{ChunkId, SnapshotChunk};

use crate::checksum::chunk_checksum;
use crate::store::{PersistedSnapshot, StoreError};

/// Iterator over the chunks of a committed snapshot
#[derive(Debug)]
pub struct SnapshotChunkReader {
    snapshot_id: String,
    snapshot_checksum: u64,
    chunks: Vec<(ChunkId, PathBuf)>,
    position: usize,
}

impl SnapshotChunkReader {
    /// Create a reader positioned at the first chunk
    ///
    /// Fails if the snapshot directory cannot be listed or holds a file
    /// whose name is not a valid chunk name.
    pub fn new(snapshot: &PersistedSnapshot) -> Result<Self, StoreError> {
        let mut chunks = Vec::new();
        for path in snapshot.files()? {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = ChunkId::new(name.clone()).map_err(|source| StoreError::InvalidChunkName {
                identity: *snapshot.identity(),
                name,
                source,
            })?;
            chunks.push((id, path));
        }

        Ok(SnapshotChunkReader {
            snapshot_id: snapshot.identity().to_string(),
            snapshot_checksum: snapshot.checksum(),
            chunks,
            position: 0,
        })
    }

    /// Position the reader at `chunk_id`
    ///
    /// If no chunk has that name, the reader moves to the next chunk in
    /// name order, or past the end.
    pub fn seek(&mut self, chunk_id: &ChunkId) {
        self.position = self.chunks.partition_point(|(id, _)| id < chunk_id);
    }

    /// Name of the chunk the next call to `next()` returns
    pub fn next_id(&self) -> Option<ChunkId> {
        self.chunks.get(self.position).map(|(id, _)| id.clone())
    }

    /// Number of chunks in the snapshot
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the snapshot has no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Iterator for SnapshotChunkReader {
    type Item = Result<SnapshotChunk, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, path) = self.chunks.get(self.position)?;
        self.position += 1;

        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) => return Some(Err(e.into())),
        };
        Some(Ok(SnapshotChunk {
            snapshot_id: self.snapshot_id.clone(),
            chunk_name: id.as_str().to_string(),
            snapshot_checksum: self.snapshot_checksum,
            checksum: chunk_checksum(&content),
            content,
        }))
    }
}
