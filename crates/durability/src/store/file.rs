//! File-backed snapshot store
//!
//! # Promotion
//!
//! Committing a staging directory follows the same crash-safe pattern as
//! any other on-disk artifact here:
//! 1. fsync the staging directory
//! 2. Rename it to `snapshots/<identity>`
//! 3. fsync `snapshots/`
//! 4. Write the commit marker to a temp file, fsync, rename, fsync `snapshots/`
//! 5. Swap in a new catalog version containing the snapshot
//!
//! A crash before step 4 completes leaves a directory without a marker,
//! which [`FileSnapshotStore::open`] removes.
//!
//! # Catalog
//!
//! The catalog is an immutable map behind `RwLock<Arc<_>>`. Readers clone
//! the `Arc` and never wait on disk I/O; publishers build the next version
//! off to the side, serialized by `publish_lock`, and swap it in.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use snapship_core::SnapshotIdentity;
use tracing::{debug, info, warn};

use super::{PersistedSnapshot, SnapshotListener, SnapshotMarker, SnapshotStore, StoreError};
use crate::checksum::{combined_checksum_of_files, list_snapshot_files};
use crate::config::StoreConfig;
use crate::paths::{parse_marker_name, StorePaths};
use crate::receiver::ChunkReceiver;

/// One immutable catalog version
#[derive(Debug, Clone, Default)]
struct Catalog {
    snapshots: BTreeMap<SnapshotIdentity, PersistedSnapshot>,
}

impl Catalog {
    fn latest(&self) -> Option<&PersistedSnapshot> {
        self.snapshots.values().next_back()
    }

    /// Remove the oldest entries until at most `max_retained` remain
    fn take_retired(&mut self, max_retained: usize) -> Vec<PersistedSnapshot> {
        let mut retired = Vec::new();
        while self.snapshots.len() > max_retained {
            match self.snapshots.pop_first() {
                Some((_, snapshot)) => retired.push(snapshot),
                None => break,
            }
        }
        retired
    }
}

/// Snapshot store backed by a directory tree
pub struct FileSnapshotStore {
    paths: StorePaths,
    config: StoreConfig,
    catalog: RwLock<Arc<Catalog>>,
    publish_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn SnapshotListener>>>,
}

impl FileSnapshotStore {
    /// Open (or create) a store
    ///
    /// Recovery:
    /// - every staging directory under `pending/` is deleted; interrupted
    ///   transfers restart from scratch
    /// - every committed snapshot is re-verified against its commit marker;
    ///   snapshots without a valid marker or with a checksum mismatch are
    ///   deleted
    /// - retention is applied to what remains
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let paths = StorePaths::from_root(&config.root);
        paths.create_directories()?;

        let purged = purge_pending(&paths, |_| true)?;
        if purged > 0 {
            info!(target: "snapship::store", purged, "Removed abandoned staging directories");
        }

        let mut catalog = load_catalog(&paths)?;
        let retired = catalog.take_retired(config.max_retained);

        let store = FileSnapshotStore {
            paths,
            config,
            catalog: RwLock::new(Arc::new(catalog)),
            publish_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        };

        for snapshot in &retired {
            store.delete_snapshot_files(snapshot.identity());
        }

        info!(
            target: "snapship::store",
            root = %store.paths.root().display(),
            snapshots = store.catalog.read().snapshots.len(),
            latest = ?store.latest().map(|s| *s.identity()),
            "Opened snapshot store"
        );
        Ok(store)
    }

    /// Store directory layout
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Start receiving a snapshot
    ///
    /// The receiver stages chunks under `pending/<identity>` and commits
    /// into this store.
    pub fn new_received_snapshot(self: &Arc<Self>, identity: SnapshotIdentity) -> ChunkReceiver {
        let store: Arc<dyn SnapshotStore> = self.clone();
        ChunkReceiver::new(
            identity,
            self.paths.pending_snapshot_dir(&identity),
            store,
            self.config.sync,
        )
    }

    /// Newest committed snapshot
    pub fn latest(&self) -> Option<PersistedSnapshot> {
        self.catalog.read().latest().cloned()
    }

    /// All committed snapshots, oldest first
    pub fn snapshots(&self) -> Vec<PersistedSnapshot> {
        self.catalog.read().snapshots.values().cloned().collect()
    }

    /// Register a listener for newly committed snapshots
    pub fn add_listener(&self, listener: Arc<dyn SnapshotListener>) {
        self.listeners.write().push(listener);
    }

    fn current(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read())
    }

    fn write_marker(&self, marker: &SnapshotMarker) -> Result<(), StoreError> {
        let final_path = self.paths.marker_path(&marker.identity);
        let temp_path = self.paths.marker_temp_path(&marker.identity);
        let bytes = serde_json::to_vec_pretty(marker).map_err(|e| StoreError::CorruptMarker {
            path: final_path.clone(),
            reason: e.to_string(),
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(&bytes)?;
        if self.config.sync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        if self.config.sync {
            sync_dir(&self.paths.snapshots_dir())?;
        }
        Ok(())
    }

    /// Remove a committed snapshot from disk, marker first
    fn delete_snapshot_files(&self, identity: &SnapshotIdentity) {
        let marker = self.paths.marker_path(identity);
        if let Err(e) = remove_file_if_exists(&marker) {
            warn!(target: "snapship::store", snapshot = %identity, error = %e, "Failed to remove commit marker");
            return;
        }
        let dir = self.paths.snapshot_dir(identity);
        match remove_dir_if_exists(&dir) {
            Ok(()) => debug!(target: "snapship::store", snapshot = %identity, "Retired snapshot"),
            Err(e) => {
                warn!(target: "snapship::store", snapshot = %identity, error = %e, "Failed to remove retired snapshot")
            }
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn exists(&self, identity: &SnapshotIdentity) -> bool {
        self.catalog.read().snapshots.contains_key(identity)
    }

    fn get(&self, identity: &SnapshotIdentity) -> Option<PersistedSnapshot> {
        self.catalog.read().snapshots.get(identity).cloned()
    }

    fn new_snapshot(
        &self,
        identity: SnapshotIdentity,
        staging_dir: &Path,
    ) -> Result<PersistedSnapshot, StoreError> {
        // held through notification so listeners see publishes in order
        let _guard = self.publish_lock.lock();
        let (snapshot, retired) = {
            let current = self.current();

            if let Some(existing) = current.snapshots.get(&identity) {
                debug!(
                    target: "snapship::store",
                    snapshot = %identity,
                    "Snapshot already committed, discarding staging directory"
                );
                if staging_dir != existing.path() {
                    if let Err(e) = remove_dir_if_exists(staging_dir) {
                        warn!(target: "snapship::store", path = %staging_dir.display(), error = %e, "Failed to remove staging directory");
                    }
                }
                return Ok(existing.clone());
            }

            if let Some(latest) = current.latest() {
                if *latest.identity() > identity {
                    return Err(StoreError::Superseded {
                        identity,
                        latest: *latest.identity(),
                    });
                }
            }

            if !staging_dir.is_dir() {
                return Err(StoreError::MissingStagingDir {
                    path: staging_dir.to_path_buf(),
                });
            }

            let files = list_snapshot_files(staging_dir)?;
            let checksum = combined_checksum_of_files(&files)?;

            let target = self.paths.snapshot_dir(&identity);
            if target.exists() {
                // uncommitted leftover (no marker, or the catalog would know it)
                warn!(target: "snapship::store", path = %target.display(), "Replacing uncommitted snapshot directory");
                fs::remove_dir_all(&target)?;
            }

            if self.config.sync {
                sync_dir(staging_dir)?;
            }
            fs::rename(staging_dir, &target)?;
            if self.config.sync {
                sync_dir(&self.paths.snapshots_dir())?;
            }

            self.write_marker(&SnapshotMarker {
                identity,
                checksum,
                files: files.len(),
            })?;

            let snapshot = PersistedSnapshot::new(identity, target, checksum);
            let mut next = (*current).clone();
            next.snapshots.insert(identity, snapshot.clone());
            let retired = next.take_retired(self.config.max_retained);
            *self.catalog.write() = Arc::new(next);

            (snapshot, retired)
        };

        for old in &retired {
            self.delete_snapshot_files(old.identity());
        }

        match purge_pending(&self.paths, |pending| pending < &identity) {
            Ok(0) => {}
            Ok(purged) => {
                debug!(target: "snapship::store", purged, "Removed staging directories of older snapshots")
            }
            Err(e) => {
                warn!(target: "snapship::store", error = %e, "Failed to purge older staging directories")
            }
        }

        info!(
            target: "snapship::store",
            snapshot = %identity,
            checksum = snapshot.checksum(),
            retired = retired.len(),
            "Committed snapshot"
        );

        for listener in self.listeners.read().iter() {
            listener.on_new_snapshot(&snapshot);
        }

        Ok(snapshot)
    }
}

impl fmt::Debug for FileSnapshotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSnapshotStore")
            .field("root", &self.paths.root())
            .field("snapshots", &self.catalog.read().snapshots.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Scan `snapshots/` and keep every snapshot that verifies against its marker
fn load_catalog(paths: &StorePaths) -> Result<Catalog, StoreError> {
    let mut dirs = Vec::new();
    let mut markers = Vec::new();

    for entry in fs::read_dir(paths.snapshots_dir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            match name.parse::<SnapshotIdentity>() {
                Ok(identity) if identity.to_string() == name => dirs.push(identity),
                _ => warn!(target: "snapship::store", path = %path.display(), "Ignoring unknown directory"),
            }
        } else if name.starts_with('.') && name.ends_with(".tmp") {
            debug!(target: "snapship::store", path = %path.display(), "Removing temporary marker");
            fs::remove_file(&path)?;
        } else if let Some(identity) = parse_marker_name(&name) {
            markers.push(identity);
        } else {
            debug!(target: "snapship::store", path = %path.display(), "Ignoring unknown file");
        }
    }

    let mut catalog = Catalog::default();
    for identity in dirs {
        match load_snapshot(paths, identity) {
            Ok(snapshot) => {
                catalog.snapshots.insert(identity, snapshot);
            }
            Err(e) => {
                warn!(target: "snapship::store", snapshot = %identity, error = %e, "Discarding invalid snapshot");
                remove_file_if_exists(&paths.marker_path(&identity))?;
                fs::remove_dir_all(paths.snapshot_dir(&identity))?;
            }
        }
    }

    for identity in markers {
        if !catalog.snapshots.contains_key(&identity) && !paths.snapshot_dir(&identity).exists() {
            warn!(target: "snapship::store", snapshot = %identity, "Removing commit marker without snapshot");
            remove_file_if_exists(&paths.marker_path(&identity))?;
        }
    }

    Ok(catalog)
}

fn load_snapshot(
    paths: &StorePaths,
    identity: SnapshotIdentity,
) -> Result<PersistedSnapshot, StoreError> {
    let marker_path = paths.marker_path(&identity);
    let bytes = match fs::read(&marker_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::MissingMarker { path: marker_path });
        }
        Err(e) => return Err(e.into()),
    };

    let marker: SnapshotMarker =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptMarker {
            path: marker_path.clone(),
            reason: e.to_string(),
        })?;
    if marker.identity != identity {
        return Err(StoreError::CorruptMarker {
            path: marker_path,
            reason: format!("marker names snapshot {}", marker.identity),
        });
    }

    let snapshot = PersistedSnapshot::new(identity, paths.snapshot_dir(&identity), marker.checksum);
    snapshot.verify()?;
    Ok(snapshot)
}

/// Remove staging directories whose identity matches `filter`
///
/// Entries that do not parse as an identity are always removed.
fn purge_pending<F>(paths: &StorePaths, filter: F) -> io::Result<usize>
where
    F: Fn(&SnapshotIdentity) -> bool,
{
    let mut count = 0;
    for entry in fs::read_dir(paths.pending_dir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let remove = match name.parse::<SnapshotIdentity>() {
            Ok(identity) => filter(&identity),
            Err(_) => true,
        };
        if !remove {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        count += 1;
    }
    Ok(count)
}

fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
