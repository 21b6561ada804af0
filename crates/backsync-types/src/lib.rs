//! Core type system and error handling for backsync
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - **Error handling**: one error enum with kinds and severities
//! - **Core types**: validated user names and scan/sync statistics
//! - **Configuration values**: buffer sizes and frame limits with validation
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use backsync_types::{Result, SyncStats, UserName};
//!
//! fn example_operation() -> Result<SyncStats> {
//!     let user = UserName::new("alice")?;
//!     assert_eq!(user.as_str(), "alice");
//!     let mut stats = SyncStats::new();
//!     stats.files_copied = 10;
//!     Ok(stats)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use config::{BufferSize, FrameLimit};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use types::*;
