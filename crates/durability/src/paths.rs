//! Snapshot store directory structure
//!
//! ```text
//! store/
//! ├── snapshots/                   # Committed snapshots
//! │   ├── 120-3/                   # One directory per snapshot, one file per chunk
//! │   ├── 120-3.meta.json          # Commit marker for 120-3
//! │   └── ...
//! └── pending/                     # Staging directories of in-flight transfers
//!     └── 240-4/
//! ```
//!
//! A committed snapshot directory without its commit marker is a crash
//! leftover and is removed when the store is opened.

use std::path::{Path, PathBuf};

use snapship_core::SnapshotIdentity;

/// Suffix of commit marker files
pub const MARKER_SUFFIX: &str = ".meta.json";

/// Snapshot store paths
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// Root store directory
    root: PathBuf,
}

impl StorePaths {
    /// Create paths from root directory
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        StorePaths {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding committed snapshots
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Directory holding staging directories
    pub fn pending_dir(&self) -> PathBuf {
        self.root.join("pending")
    }

    /// Directory of one committed snapshot
    pub fn snapshot_dir(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.snapshots_dir().join(identity.to_string())
    }

    /// Commit marker of one committed snapshot
    pub fn marker_path(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}{}", identity, MARKER_SUFFIX))
    }

    /// Temporary file a commit marker is written to before its rename
    pub fn marker_temp_path(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.snapshots_dir()
            .join(format!(".{}{}.tmp", identity, MARKER_SUFFIX))
    }

    /// Staging directory of one in-flight transfer
    pub fn pending_snapshot_dir(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.pending_dir().join(identity.to_string())
    }

    /// Create the full directory structure
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        std::fs::create_dir_all(self.pending_dir())?;
        Ok(())
    }
}

/// Parse the identity out of a commit marker file name
pub fn parse_marker_name(file_name: &str) -> Option<SnapshotIdentity> {
    file_name.strip_suffix(MARKER_SUFFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_from_root() {
        let paths = StorePaths::from_root("/tmp/store");
        let id = SnapshotIdentity::new(120, 3);

        assert_eq!(paths.root(), Path::new("/tmp/store"));
        assert_eq!(paths.snapshots_dir(), PathBuf::from("/tmp/store/snapshots"));
        assert_eq!(paths.pending_dir(), PathBuf::from("/tmp/store/pending"));
        assert_eq!(
            paths.snapshot_dir(&id),
            PathBuf::from("/tmp/store/snapshots/120-3")
        );
        assert_eq!(
            paths.marker_path(&id),
            PathBuf::from("/tmp/store/snapshots/120-3.meta.json")
        );
        assert_eq!(
            paths.marker_temp_path(&id),
            PathBuf::from("/tmp/store/snapshots/.120-3.meta.json.tmp")
        );
        assert_eq!(
            paths.pending_snapshot_dir(&id),
            PathBuf::from("/tmp/store/pending/120-3")
        );
    }

    #[test]
    fn test_distinct_identities_never_share_staging() {
        let paths = StorePaths::from_root("/tmp/store");
        let a = SnapshotIdentity::new(1, 1);
        let b = SnapshotIdentity::new(1, 1).with_timestamp(0);
        let c = SnapshotIdentity::new(11, 1);

        assert_ne!(paths.pending_snapshot_dir(&a), paths.pending_snapshot_dir(&b));
        assert_ne!(paths.pending_snapshot_dir(&a), paths.pending_snapshot_dir(&c));
    }

    #[test]
    fn test_parse_marker_name() {
        assert_eq!(
            parse_marker_name("120-3.meta.json"),
            Some(SnapshotIdentity::new(120, 3))
        );
        assert_eq!(
            parse_marker_name("120-3-9.meta.json"),
            Some(SnapshotIdentity::new(120, 3).with_timestamp(9))
        );
        assert_eq!(parse_marker_name("120-3"), None);
        assert_eq!(parse_marker_name(".120-3.meta.json.tmp"), None);
        assert_eq!(parse_marker_name("garbage.meta.json"), None);
    }

    #[test]
    fn test_create_directories() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::from_root(dir.path().join("store"));

        paths.create_directories().unwrap();

        assert!(paths.root().exists());
        assert!(paths.snapshots_dir().is_dir());
        assert!(paths.pending_dir().is_dir());
    }
}
