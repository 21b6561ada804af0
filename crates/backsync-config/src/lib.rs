//! Configuration management for backsync
//!
//! Both peers read the same configuration shape: a `server` and a `client`
//! section, the manifest file names, transfer tuning and logging. Values are
//! layered as defaults, then a YAML/TOML/JSON file, then environment
//! variables.
//!
//! # Examples
//!
//! ```rust
//! use backsync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("backsync.yaml")
//!     .add_env_prefix("BACKSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Server manifest: {}", config.manifest.server_manifest);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use backsync_types::{BufferSize, FrameLimit};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for backsync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server-side settings
    pub server: ServerSettings,
    /// Client-side settings
    pub client: ClientSettings,
    /// Manifest file names
    pub manifest: ManifestConfig,
    /// Transfer tuning
    pub transfer: TransferConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Settings used by `backsync serve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Directory holding one backup directory per user
    pub storage_root: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7878".to_string(),
            storage_root: PathBuf::from("backup"),
        }
    }
}

/// Settings used by `backsync connect`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Server address; prompted for when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
    /// Directory holding the user's local directory
    pub storage_root: PathBuf,
    /// User name; prompted for when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_addr: None,
            storage_root: PathBuf::from("."),
            user: None,
        }
    }
}

/// Names of the per-user manifest files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Manifest produced by the client's scan
    pub client_manifest: String,
    /// Manifest produced by the server's scan
    pub server_manifest: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            client_manifest: "client.yaml".to_string(),
            server_manifest: "server.yaml".to_string(),
        }
    }
}

/// Transfer tuning shared by both peers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size for hashing and payload streaming
    pub buffer_size: BufferSize,
    /// Largest framed message accepted from the peer
    pub frame_limit: FrameLimit,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            colored_output: true,
        }
    }
}
