//! End-to-end snapshot transfer tests
//!
//! Drive a full transfer through the public API: a committed snapshot on
//! one store is streamed through `SnapshotChunkReader` into a receiver of
//! another store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use snapship_core::{SnapshotChunk, SnapshotIdentity};
use snapship_durability::{
    chunk_checksum, combined_checksum, ChunkOutcome, ChunkRejection, FileSnapshotStore,
    ReceiveError, SnapshotChunkReader, SnapshotStore, StoreConfig, StoreError,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn open_store(dir: &Path) -> Arc<FileSnapshotStore> {
    Arc::new(FileSnapshotStore::open(StoreConfig::for_testing(dir)).unwrap())
}

/// Commit a snapshot with the given files directly through the store
fn seed(store: &FileSnapshotStore, identity: SnapshotIdentity, files: &[(&str, &[u8])]) {
    let staging = store.paths().pending_snapshot_dir(&identity);
    fs::create_dir_all(&staging).unwrap();
    for (name, content) in files {
        fs::write(staging.join(name), content).unwrap();
    }
    store.new_snapshot(identity, &staging).unwrap();
}

fn chunks_of(store: &FileSnapshotStore, identity: &SnapshotIdentity) -> Vec<SnapshotChunk> {
    let snapshot = store.get(identity).unwrap();
    SnapshotChunkReader::new(&snapshot)
        .unwrap()
        .map(Result::unwrap)
        .collect()
}

#[test]
fn test_transfer_between_stores() {
    init_tracing();
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let leader = open_store(leader_dir.path());
    let follower = open_store(follower_dir.path());
    let identity = SnapshotIdentity::new(120, 3).with_timestamp(1_700_000_000);

    seed(
        &leader,
        identity,
        &[("state.db", b"key=value"), ("meta", b"{}"), ("index-0", b"")],
    );

    let mut receiver = follower.new_received_snapshot(identity);
    for chunk in chunks_of(&leader, &identity) {
        assert!(receiver.apply(&chunk));
    }
    let snapshot = receiver.persist().unwrap();

    let source = leader.get(&identity).unwrap();
    assert_eq!(snapshot.checksum(), source.checksum());
    assert!(follower.exists(&identity));
    assert_eq!(follower.latest().unwrap(), snapshot);
    assert_eq!(
        fs::read(snapshot.path().join("state.db")).unwrap(),
        b"key=value"
    );
    assert!(!receiver.staging_dir().exists());
}

#[test]
fn test_reordered_and_duplicated_delivery() {
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let leader = open_store(leader_dir.path());
    let follower = open_store(follower_dir.path());
    let identity = SnapshotIdentity::new(50, 2);
    seed(&leader, identity, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);

    let mut chunks = chunks_of(&leader, &identity);
    chunks.reverse();
    let repeated = chunks[1].clone();
    chunks.push(repeated);

    let mut receiver = follower.new_received_snapshot(identity);
    for chunk in &chunks {
        assert!(receiver.apply(chunk));
    }

    let snapshot = receiver.persist().unwrap();
    assert_eq!(snapshot.files().unwrap().len(), 3);
    assert!(snapshot.verify().is_ok());
}

#[test]
fn test_mixed_generation_chunks_rejected() {
    let follower_dir = TempDir::new().unwrap();
    let follower = open_store(follower_dir.path());
    let identity = SnapshotIdentity::new(10, 1);

    let chunk = |name: &str, snapshot_checksum: u64| SnapshotChunk {
        snapshot_id: identity.to_string(),
        chunk_name: name.to_string(),
        snapshot_checksum,
        checksum: chunk_checksum(b"data"),
        content: b"data".to_vec(),
    };

    let mut receiver = follower.new_received_snapshot(identity);
    assert!(receiver.apply(&chunk("c1", 42)));
    assert!(matches!(
        receiver.apply_chunk(&chunk("c2", 43)),
        ChunkOutcome::Rejected(ChunkRejection::SnapshotChecksumMismatch { .. })
    ));

    // 42 is not the checksum of {c1}, so the transfer cannot commit
    assert!(matches!(
        receiver.persist(),
        Err(ReceiveError::SnapshotChecksumMismatch { .. })
    ));
    assert!(!follower.exists(&identity));

    receiver.abort();
    assert!(!receiver.staging_dir().exists());
}

#[test]
fn test_late_chunk_after_persist_is_noop() {
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let leader = open_store(leader_dir.path());
    let identity = SnapshotIdentity::new(7, 1);
    seed(&leader, identity, &[("c1", b"AAA"), ("c2", b"BBB")]);
    let chunks = chunks_of(&leader, &identity);

    {
        let follower = open_store(follower_dir.path());
        let mut receiver = follower.new_received_snapshot(identity);
        for chunk in &chunks {
            assert!(receiver.apply(chunk));
        }
        receiver.persist().unwrap();

        assert!(matches!(
            receiver.apply_chunk(&chunks[0]),
            ChunkOutcome::AlreadyPersisted
        ));
        assert!(!receiver.staging_dir().exists());
    }

    // a fresh receiver after restart sees the committed snapshot too
    let follower = open_store(follower_dir.path());
    let mut receiver = follower.new_received_snapshot(identity);
    assert!(matches!(
        receiver.apply_chunk(&chunks[1]),
        ChunkOutcome::AlreadyPersisted
    ));
    assert_eq!(receiver.persist().unwrap(), follower.get(&identity).unwrap());
    assert_eq!(follower.snapshots().len(), 1);
}

#[test]
fn test_restart_discards_interrupted_transfer() {
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let leader = open_store(leader_dir.path());
    let identity = SnapshotIdentity::new(9, 4);
    seed(&leader, identity, &[("c1", b"AAA"), ("c2", b"BBB")]);
    let chunks = chunks_of(&leader, &identity);

    let staging = {
        let follower = open_store(follower_dir.path());
        let mut receiver = follower.new_received_snapshot(identity);
        assert!(receiver.apply(&chunks[0]));
        receiver.staging_dir().to_path_buf()
    };
    assert!(staging.exists());

    let follower = open_store(follower_dir.path());
    assert!(!staging.exists());
    assert!(follower.latest().is_none());

    let mut receiver = follower.new_received_snapshot(identity);
    for chunk in &chunks {
        assert!(receiver.apply(chunk));
    }
    assert!(receiver.persist().is_ok());
}

#[test]
fn test_newer_snapshot_retires_older() {
    let follower_dir = TempDir::new().unwrap();
    let leader_dir = TempDir::new().unwrap();
    let leader = open_store(leader_dir.path());
    let follower = open_store(follower_dir.path());
    let old = SnapshotIdentity::new(10, 1);
    let new = SnapshotIdentity::new(20, 1);
    seed(&leader, old, &[("c1", b"old")]);
    let old_chunks = chunks_of(&leader, &old);

    let mut receiver = follower.new_received_snapshot(old);
    for chunk in &old_chunks {
        receiver.apply(chunk);
    }
    let old_snapshot = receiver.persist().unwrap();

    seed(&leader, new, &[("c1", b"new")]);
    let mut receiver = follower.new_received_snapshot(new);
    for chunk in chunks_of(&leader, &new) {
        receiver.apply(&chunk);
    }
    receiver.persist().unwrap();

    assert!(!follower.exists(&old));
    assert!(!old_snapshot.path().exists());
    assert_eq!(follower.latest().unwrap().identity(), &new);

    // the old snapshot arriving late can no longer be committed
    let mut late = follower.new_received_snapshot(old);
    for chunk in &old_chunks {
        assert!(late.apply(chunk));
    }
    assert!(matches!(
        late.persist(),
        Err(ReceiveError::Store(StoreError::Superseded { .. }))
    ));
    late.abort();
    assert!(!late.staging_dir().exists());
}

fn arb_files() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        "[a-z0-9][a-z0-9._-]{0,11}",
        prop::collection::vec(any::<u8>(), 0..256),
        1..8,
    )
    .prop_flat_map(|files| Just(files.into_iter().collect::<Vec<_>>()).prop_shuffle())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_delivery_order_commits(files in arb_files()) {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let identity = SnapshotIdentity::new(1, 1);

        let mut sorted = files.clone();
        sorted.sort();
        let expected = combined_checksum(sorted.iter().map(|(n, c)| (n.as_bytes(), c.as_slice())));

        let mut receiver = store.new_received_snapshot(identity);
        for (name, content) in &files {
            let chunk = SnapshotChunk {
                snapshot_id: identity.to_string(),
                chunk_name: name.clone(),
                snapshot_checksum: expected,
                checksum: chunk_checksum(content),
                content: content.clone(),
            };
            prop_assert!(receiver.apply(&chunk));
        }

        let snapshot = receiver.persist().unwrap();
        prop_assert_eq!(snapshot.checksum(), expected);
        for (name, content) in &files {
            prop_assert_eq!(&fs::read(snapshot.path().join(name)).unwrap(), content);
        }
    }
}
