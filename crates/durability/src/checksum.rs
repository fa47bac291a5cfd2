//! Snapshot checksums
//!
//! Two granularities:
//!
//! - **Chunk checksum**: CRC32 over one chunk's bytes, widened to `u64`.
//!   Catches corruption of a single message in transit.
//! - **Combined checksum**: XXH3-64 over the ordered sequence of
//!   `(file name, content)` pairs of a whole snapshot. Catches missing,
//!   duplicated or renamed chunks that each pass their own check.
//!
//! Each pair is fed into the hasher length-prefixed, so moving bytes from
//! one file into its neighbour (or from a name into content) changes the
//! result. Callers must present files in a stable order; on disk that order
//! is ascending file name (see [`list_snapshot_files`]).

use std::io;
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::Xxh3;

/// Checksum of a single chunk's content
#[inline]
pub fn chunk_checksum(content: &[u8]) -> u64 {
    crc32fast::hash(content) as u64
}

/// Incremental combined checksum over ordered `(name, content)` pairs
pub struct CombinedChecksum {
    hasher: Xxh3,
    files: usize,
}

impl CombinedChecksum {
    /// Start an empty combined checksum
    pub fn new() -> Self {
        CombinedChecksum {
            hasher: Xxh3::new(),
            files: 0,
        }
    }

    /// Feed the next file in order
    pub fn update(&mut self, name: &[u8], content: &[u8]) {
        self.hasher.update(&(name.len() as u64).to_le_bytes());
        self.hasher.update(name);
        self.hasher.update(&(content.len() as u64).to_le_bytes());
        self.hasher.update(content);
        self.files += 1;
    }

    /// Number of files fed so far
    pub fn files(&self) -> usize {
        self.files
    }

    /// Final checksum value
    pub fn finish(&self) -> u64 {
        self.hasher.digest()
    }
}

impl Default for CombinedChecksum {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined checksum over in-memory `(name, content)` pairs, in the given order
pub fn combined_checksum<I, N, C>(files: I) -> u64
where
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    let mut combined = CombinedChecksum::new();
    for (name, content) in files {
        combined.update(name.as_ref(), content.as_ref());
    }
    combined.finish()
}

/// Combined checksum over files on disk, in the given order
///
/// Every file is read back in full; nothing is taken from caches or from
/// checksums computed when the file was written.
pub fn combined_checksum_of_files(paths: &[PathBuf]) -> io::Result<u64> {
    let mut combined = CombinedChecksum::new();
    for path in paths {
        let name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no file name in {}", path.display()),
            )
        })?;
        let content = std::fs::read(path)?;
        combined.update(name.to_string_lossy().as_bytes(), &content);
    }
    Ok(combined.finish())
}

/// List the files of a snapshot directory, sorted by file name
///
/// A snapshot directory holds only regular files. Anything else (a nested
/// directory, a symlink) is reported as `InvalidData`.
pub fn list_snapshot_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected non-file entry {}", entry.path().display()),
            ));
        }
        files.push(entry.path());
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Combined checksum of every file in a snapshot directory
pub fn combined_checksum_of_dir(dir: &Path) -> io::Result<u64> {
    let files = list_snapshot_files(dir)?;
    combined_checksum_of_files(&files)
}
