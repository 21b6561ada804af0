//! Core data types for backsync
//!
//! The validated user name that scopes every session, and the statistics
//! both peers report at the end of a scan or a sync.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// File size in bytes
pub type FileSize = u64;

/// Transfer rate in bytes per second
pub type TransferRate = f64;

/// Name of a user namespace.
///
/// The name doubles as a directory name under the storage root on both
/// peers, so anything that could escape that root is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct UserName(String);

impl UserName {
    /// Validate and wrap a user name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::protocol("user name is empty"));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(Error::protocol(format!("user name '{}' is reserved", trimmed)));
        }
        if trimmed.contains(['/', '\\', '\0']) {
            return Err(Error::protocol(format!(
                "user name '{}' contains a path separator",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root directory of this user under `storage_root`
    pub fn root_in(&self, storage_root: &Path) -> PathBuf {
        storage_root.join(&self.0)
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserName {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl From<UserName> for String {
    fn from(name: UserName) -> Self {
        name.0
    }
}

/// Statistics of one directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanStats {
    /// Files fingerprinted and recorded
    pub files_scanned: u64,
    /// Bytes hashed
    pub bytes_hashed: u64,
    /// Files skipped because they are excluded
    pub files_excluded: u64,
    /// Files that could not be read
    pub errors: u64,
    /// Wall time of the scan
    pub duration: Duration,
}

impl ScanStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }
}

/// Statistics of one sync phase, seen from either peer
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncStats {
    /// Files transferred
    pub files_copied: u64,
    /// Payload bytes transferred
    pub bytes_copied: u64,
    /// Files deleted from the backup store
    pub files_deleted: u64,
    /// Directories removed while pruning
    pub directories_pruned: u64,
    /// Files requested but not transferred
    pub files_skipped: u64,
    /// Recoverable errors encountered
    pub errors: u64,
    /// Wall time of the phase
    pub duration: Duration,
}

impl SyncStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate the overall transfer rate
    pub fn transfer_rate(&self) -> TransferRate {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &SyncStats) {
        self.files_copied += other.files_copied;
        self.bytes_copied += other.bytes_copied;
        self.files_deleted += other.files_deleted;
        self.directories_pruned += other.directories_pruned;
        self.files_skipped += other.files_skipped;
        self.errors += other.errors;
        self.duration += other.duration;
    }
}
