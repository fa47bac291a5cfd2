//! Durability layer for Snapship
//!
//! This crate handles everything that touches disk:
//!
//! - Checksums: per-chunk CRC32 and the combined snapshot checksum
//! - Chunk receiver: staging, validation and verification of incoming chunks
//! - Snapshot store: crash-safe promotion, catalog, retention, recovery
//! - Chunk reader: streaming a committed snapshot back out as chunks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum; // Chunk and combined snapshot checksums
pub mod chunk_reader; // Sender-side chunk iteration
pub mod config; // Store configuration
pub mod paths; // Store directory layout
pub mod receiver; // Chunk staging and verification
pub mod store; // SnapshotStore contract and file-backed catalog

// === Re-exports ===
pub use checksum::{
    chunk_checksum, combined_checksum, combined_checksum_of_dir, combined_checksum_of_files,
    list_snapshot_files, CombinedChecksum,
};
pub use chunk_reader::SnapshotChunkReader;
pub use config::{ConfigError, StoreConfig};
pub use paths::StorePaths;
pub use receiver::{ChunkOutcome, ChunkReceiver, ChunkRejection, ReceiveError};
pub use store::{
    FileSnapshotStore, PersistedSnapshot, SnapshotListener, SnapshotMarker, SnapshotStore,
    StoreError,
};
