//! Snapship - Chunked snapshot replication for replicated logs
//!
//! A follower that is too far behind the leader receives a snapshot of the
//! leader's state as a stream of named chunks. Snapship stages those chunks,
//! verifies them, and commits the snapshot into a durable local catalog.
//!
//! # Quick Start
//!
//! ```ignore
//! use snapship::{FileSnapshotStore, SnapshotIdentity, StoreConfig};
//!
//! let store = FileSnapshotStore::open(StoreConfig::new("/var/lib/node/snapshots"))?;
//!
//! let mut receiver = store.new_received_snapshot(SnapshotIdentity::new(120, 3));
//! for chunk in chunks {
//!     if !receiver.apply(&chunk) {
//!         receiver.abort();
//!         return Ok(());
//!     }
//! }
//! let snapshot = receiver.persist()?;
//! ```
//!
//! # Architecture
//!
//! - `snapship-core`: identities, chunk names, the chunk wire record
//! - `snapship-durability`: receiver, store, checksums, chunk reader

pub use snapship_core::*;
pub use snapship_durability::*;
