//! End-to-end tests for backsync
//!
//! Full client/server sessions over loopback TCP, plus the helpers they
//! share.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Scratch directories for both peers, a server bound to an ephemeral port
/// and helpers to build and inspect file trees.
pub mod test_utils;
