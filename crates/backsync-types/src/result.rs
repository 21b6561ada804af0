//! Result type alias for backsync operations

use crate::Error;

/// Result type alias for backsync operations
pub type Result<T> = std::result::Result<T, Error>;
