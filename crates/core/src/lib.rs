//! Core types for snapshot replication
//!
//! This crate defines the data model shared by the sending and receiving
//! side of a snapshot transfer:
//! - SnapshotIdentity: (index, term, timestamp) naming one snapshot version
//! - ChunkId: validated, filesystem-safe name of one chunk
//! - SnapshotChunk: one chunk message as delivered by the transport
//!
//! Nothing in this crate touches disk.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk; // Inbound chunk message
pub mod chunk_id; // Filesystem-safe chunk names
pub mod identity; // Snapshot identity and its text form

pub use chunk::SnapshotChunk;
pub use chunk_id::{ChunkId, ChunkIdError, MAX_CHUNK_ID_LENGTH};
pub use identity::{IdentityParseError, SnapshotIdentity};
