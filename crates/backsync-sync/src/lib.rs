//! Fingerprinting, manifests and manifest reconciliation for backsync
//!
//! Everything one peer needs to describe its side of a backup and to work
//! out what has to change:
//!
//! - **Fingerprints**: BLAKE3 digests of file content
//! - **Manifests**: `(path, hash)` records persisted as YAML
//! - **Scanning**: recursive walks of a user root into a manifest
//! - **Diffing**: copy and delete sets from a client and a server manifest
//! - **Pruning**: deletion of stale files and of the directories they empty
//!
//! # Examples
//!
//! ```rust
//! use backsync_sync::{diff, FileRecord, Manifest};
//!
//! let client: Manifest = [FileRecord::new("a.txt", "H1"), FileRecord::new("b.txt", "H2")]
//!     .into_iter()
//!     .collect();
//! let server: Manifest = [FileRecord::new("a.txt", "H1"), FileRecord::new("c.txt", "H3")]
//!     .into_iter()
//!     .collect();
//!
//! let result = diff(&client, &server);
//! assert_eq!(result.to_copy, vec!["b.txt"]);
//! assert_eq!(result.to_delete, vec!["c.txt"]);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod diff;
pub mod fingerprint;
pub mod manifest;
pub mod paths;
pub mod prune;
pub mod scanner;

pub use diff::{diff, DiffResult};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, FINGERPRINT_HEX_LEN};
pub use manifest::{FileRecord, Manifest};
pub use paths::{relative_key, resolve_under};
pub use prune::{delete_and_prune, PruneOutcome};
pub use scanner::{ScanOutcome, Scanner};
