//! Error types and handling for backsync
//!
//! Every library crate in the workspace reports failures through [`Error`].
//! The session loops consult [`Error::is_fatal`] to decide whether a failure
//! only skips the current item or ends the connection.

use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - the enclosing loop continues without noticing
    Low,
    /// Medium severity - the current item is skipped and reported
    Medium,
    /// High severity - the current operation is abandoned
    High,
    /// Critical severity - the session must end
    Critical,
}

/// Main error type for backsync operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// File read/write/create/delete failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// File not found
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found
        path: PathBuf,
    },

    /// Permission denied
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// Path to the file with permission issues
        path: PathBuf,
    },

    /// Directory creation or removal failed
    #[error("Directory error at {path}: {message}")]
    Directory {
        /// Directory that could not be created or removed
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// Connect/accept failure, or the peer went away mid-transfer
    #[error("Connection error: {message}")]
    Connection {
        /// Error message describing the connection issue
        message: String,
    },

    /// The peer sent something the session did not expect
    #[error("Protocol violation: {message}")]
    Protocol {
        /// What was expected and what arrived
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Manifest or message encoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message from the encoder or decoder
        message: String,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Directory provisioning and pruning errors
    Directory,
    /// Connection errors
    Connection,
    /// Protocol violations
    Protocol,
    /// Configuration errors
    Config,
    /// Serialization errors
    Serialization,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::FileNotFound { .. } | Self::PermissionDenied { .. } => {
                ErrorKind::Io
            }
            Self::Directory { .. } => ErrorKind::Directory,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Config { .. } => ErrorKind::Config,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Directory { .. } => ErrorSeverity::Low,
            Self::Io { .. } | Self::FileNotFound { .. } | Self::PermissionDenied { .. } => {
                ErrorSeverity::Medium
            }
            Self::Serialization { .. } | Self::Other { .. } => ErrorSeverity::Medium,
            Self::Config { .. } => ErrorSeverity::High,
            Self::Connection { .. } | Self::Protocol { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the session has to end after this error.
    ///
    /// Everything else is logged at the failing operation and the enclosing
    /// loop carries on with the next item. Nothing is retried.
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new directory error
    pub fn directory<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Directory {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new protocol violation
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Attach the path that was being touched to an I/O failure
    pub fn from_io_at<P: Into<PathBuf>>(error: std::io::Error, path: P) -> Self {
        let path = path.into();
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                message: format!("{}: {}", path.display(), error),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
