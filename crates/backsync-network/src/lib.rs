//! Session protocol and file transfer for backsync
//!
//! This crate carries one backup session between a client and a server:
//!
//! - **Framing**: length-prefixed bincode messages with a size limit
//! - **Commands**: SCAN, SYNC, END_SYNC and EXIT as distinct message variants
//! - **File transfer**: whole files sent as a header plus raw payload
//! - **Server**: scans the backup store, reconciles manifests, pulls files
//! - **Client**: scans the local directory and answers file requests
//!
//! # Examples
//!
//! ```rust,no_run
//! use backsync_network::{ClientConfig, NetworkClient};
//! use backsync_types::UserName;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = NetworkClient::connect(ClientConfig::default()).await?;
//! client.login(UserName::new("alice")?).await?;
//! client.scan().await?;
//! let stats = client.sync().await?;
//! println!("Sent {} files, {} bytes", stats.files_copied, stats.bytes_copied);
//! client.exit().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transfer;

pub use client::{ClientConfig, NetworkClient};
pub use connection::{Connection, ConnectionId, ConnectionInfo};
pub use protocol::{Command, FileDescriptor, Message};
pub use server::{NetworkServer, ServerConfig, SessionReport, ACCEPT_BACKOFF};
pub use session::{ManifestNames, SessionContext, SessionId, SessionState};
pub use transfer::{FileTransfer, TransferOutcome};
