//! Chunk names
//!
//! A chunk name arrives as raw bytes from a remote node and is used as a
//! file name inside the staging directory. It must therefore be validated
//! before it gets anywhere near a `Path::join`.
//!
//! ## Validation
//!
//! Chunk names must:
//! - Be 1-255 bytes
//! - Contain only ASCII alphanumeric, dash, underscore, dot
//! - Not start with a dot (which also rules out `.` and `..`)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a chunk name in bytes
pub const MAX_CHUNK_ID_LENGTH: usize = 255;

/// Filesystem-safe name of one chunk within a transfer
///
/// Valid names:
/// - "000001.sst"
/// - "CURRENT"
/// - "state_v2-part-3"
///
/// Invalid names:
/// - "" (empty)
/// - ".hidden" / ".."
/// - "../etc/passwd"
/// - "has space"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

/// Error when validating a chunk name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkIdError {
    /// Name is empty
    #[error("chunk name cannot be empty")]
    Empty,

    /// Name exceeds maximum length
    #[error("chunk name too long: {length} bytes (max {max})")]
    TooLong {
        /// Actual length of the name
        length: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Name contains a byte outside the allowed set
    #[error("invalid byte {byte:#04x} at position {position} (only ASCII alphanumeric, dash, underscore, dot allowed)")]
    InvalidByte {
        /// The invalid byte
        byte: u8,
        /// Position of the invalid byte
        position: usize,
    },

    /// Name starts with a dot
    #[error("chunk name cannot start with '.'")]
    LeadingDot,
}

impl ChunkId {
    /// Create a new ChunkId, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, ChunkIdError> {
        let name = name.into();
        Self::validate(name.as_bytes())?;
        Ok(ChunkId(name))
    }

    /// Create a ChunkId from wire bytes
    ///
    /// Bytes are validated before any conversion, so non-ASCII input is
    /// reported as `InvalidByte` rather than a UTF-8 error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkIdError> {
        Self::validate(bytes)?;
        // validated bytes are ASCII
        Ok(ChunkId(bytes.iter().map(|&b| b as char).collect()))
    }

    /// Validate a chunk name
    pub fn validate(name: &[u8]) -> Result<(), ChunkIdError> {
        if name.is_empty() {
            return Err(ChunkIdError::Empty);
        }

        if name.len() > MAX_CHUNK_ID_LENGTH {
            return Err(ChunkIdError::TooLong {
                length: name.len(),
                max: MAX_CHUNK_ID_LENGTH,
            });
        }

        if name[0] == b'.' {
            return Err(ChunkIdError::LeadingDot);
        }

        for (position, &byte) in name.iter().enumerate() {
            if !Self::is_valid_byte(byte) {
                return Err(ChunkIdError::InvalidByte { byte, position });
            }
        }

        Ok(())
    }

    #[inline]
    fn is_valid_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.'
    }

    /// Get the name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the name as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl AsRef<str> for ChunkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = ChunkIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ChunkId::new(value)
    }
}

impl TryFrom<&str> for ChunkId {
    type Error = ChunkIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ChunkId::new(value)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(ChunkId::new("000001.sst").is_ok());
        assert!(ChunkId::new("CURRENT").is_ok());
        assert!(ChunkId::new("state_v2-part-3").is_ok());
        assert!(ChunkId::new("a").is_ok());
        assert!(ChunkId::new("a".repeat(MAX_CHUNK_ID_LENGTH)).is_ok());
    }

    #[test]
    fn test_empty() {
        assert_eq!(ChunkId::new(""), Err(ChunkIdError::Empty));
    }

    #[test]
    fn test_too_long() {
        let err = ChunkId::new("a".repeat(MAX_CHUNK_ID_LENGTH + 1)).unwrap_err();
        assert_eq!(
            err,
            ChunkIdError::TooLong {
                length: MAX_CHUNK_ID_LENGTH + 1,
                max: MAX_CHUNK_ID_LENGTH
            }
        );
    }

    #[test]
    fn test_traversal_rejected() {
        assert_eq!(ChunkId::new(".."), Err(ChunkIdError::LeadingDot));
        assert_eq!(ChunkId::new("."), Err(ChunkIdError::LeadingDot));
        assert_eq!(ChunkId::new(".hidden"), Err(ChunkIdError::LeadingDot));
        assert!(matches!(
            ChunkId::new("../etc/passwd"),
            Err(ChunkIdError::LeadingDot)
        ));
        assert_eq!(
            ChunkId::new("a/b"),
            Err(ChunkIdError::InvalidByte {
                byte: b'/',
                position: 1
            })
        );
        assert!(ChunkId::new("a\\b").is_err());
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(ChunkId::new("has space").is_err());
        assert!(ChunkId::new("nul\0").is_err());
        assert!(ChunkId::from_bytes(&[b'a', 0xC3, 0xA9]).is_err());
    }

    #[test]
    fn test_from_bytes() {
        let id = ChunkId::from_bytes(b"chunk-7").unwrap();
        assert_eq!(id.as_str(), "chunk-7");
        assert_eq!(id.as_bytes(), b"chunk-7");
    }

    #[test]
    fn test_serde_validates() {
        let id: ChunkId = serde_json::from_str("\"c1\"").unwrap();
        assert_eq!(id.as_str(), "c1");
        assert!(serde_json::from_str::<ChunkId>("\"../x\"").is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let mut ids = vec![
            ChunkId::new("b").unwrap(),
            ChunkId::new("B").unwrap(),
            ChunkId::new("a10").unwrap(),
            ChunkId::new("a2").unwrap(),
        ];
        ids.sort();
        let names: Vec<_> = ids.iter().map(ChunkId::as_str).collect();
        assert_eq!(names, vec!["B", "a10", "a2", "b"]);
    }
}
