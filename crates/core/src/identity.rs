//! Snapshot identity
//!
//! A snapshot is named by the log position it covers: the index of the last
//! entry folded into it, the term of that entry, and an optional timestamp
//! that distinguishes snapshots taken at the same position.
//!
//! The text form doubles as a directory name in the store:
//!
//! ```text
//! {index}-{term}              e.g. "120-3"
//! {index}-{term}-{timestamp}  e.g. "120-3-1700000000000"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of one snapshot version
///
/// Ordering is by index, then term, then timestamp. A missing timestamp
/// sorts before any present one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotIdentity {
    index: u64,
    term: u64,
    timestamp: Option<u64>,
}

impl SnapshotIdentity {
    /// Create an identity without a timestamp
    pub fn new(index: u64, term: u64) -> Self {
        SnapshotIdentity {
            index,
            term,
            timestamp: None,
        }
    }

    /// Attach a timestamp (milliseconds since epoch)
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Index of the last log entry covered by the snapshot
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Term of the last log entry covered by the snapshot
    #[inline]
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Timestamp, if the sender attached one
    #[inline]
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

impl fmt::Display for SnapshotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{}-{}-{}", self.index, self.term, ts),
            None => write!(f, "{}-{}", self.index, self.term),
        }
    }
}

impl FromStr for SnapshotIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(IdentityParseError::InvalidFormat(s.to_string()));
        }

        let field = |name: &'static str, value: &str| {
            // u64::from_str accepts a leading '+', which would break the
            // one-identity-one-name mapping
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(IdentityParseError::InvalidNumber {
                    field: name,
                    value: value.to_string(),
                });
            }
            value.parse::<u64>().map_err(|_| IdentityParseError::InvalidNumber {
                field: name,
                value: value.to_string(),
            })
        };

        let index = field("index", parts[0])?;
        let term = field("term", parts[1])?;
        let timestamp = match parts.get(2) {
            Some(ts) => Some(field("timestamp", ts)?),
            None => None,
        };

        Ok(SnapshotIdentity {
            index,
            term,
            timestamp,
        })
    }
}

/// Error when parsing a snapshot identity from its text form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    /// Wrong number of dash-separated fields
    #[error("Invalid snapshot id '{0}': expected 'index-term' or 'index-term-timestamp'")]
    InvalidFormat(String),

    /// A field is not an unsigned decimal number
    #[error("Invalid snapshot id: {field} '{value}' is not a number")]
    InvalidNumber {
        /// Name of the offending field
        field: &'static str,
        /// Raw field text
        value: String,
    },
}
