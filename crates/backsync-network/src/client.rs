//! Client side of the backup protocol

use crate::connection::Connection;
use crate::protocol::{Command, Message};
use crate::session::{ManifestNames, SessionContext, SessionState};
use crate::transfer::{FileTransfer, TransferOutcome};
use backsync_config::Config;
use backsync_sync::Scanner;
use backsync_types::{BufferSize, Error, FrameLimit, Result, ScanStats, SyncStats, UserName};
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Network client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub server_addr: String,
    /// Directory holding the user's local directory
    pub storage_root: PathBuf,
    /// Manifest file names inside the user directory
    pub manifests: ManifestNames,
    /// Chunk size for hashing and payload streaming
    pub buffer_size: BufferSize,
    /// Largest frame accepted from the server
    pub frame_limit: FrameLimit,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7878".to_string(),
            storage_root: PathBuf::from("."),
            manifests: ManifestNames::default(),
            buffer_size: BufferSize::default(),
            frame_limit: FrameLimit::default(),
        }
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            server_addr: config
                .client
                .server_addr
                .clone()
                .unwrap_or(defaults.server_addr),
            storage_root: config.client.storage_root.clone(),
            manifests: config.manifest.clone().into(),
            buffer_size: config.transfer.buffer_size,
            frame_limit: config.transfer.frame_limit,
        }
    }
}

/// Backup client driving one session with a server
#[derive(Debug)]
pub struct NetworkClient<S = TcpStream> {
    config: ClientConfig,
    connection: Connection<S>,
    scanner: Scanner,
    state: SessionState,
    context: Option<SessionContext>,
    scanned_since_sync: bool,
}

impl NetworkClient<TcpStream> {
    /// Connect to the configured server
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connection =
            Connection::connect(&config.server_addr, config.frame_limit, config.buffer_size)
                .await?;
        info!("Connected to {}", config.server_addr);
        Ok(Self::with_connection(config, connection))
    }
}

impl<S> NetworkClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Drive the protocol over an established connection
    pub fn with_connection(config: ClientConfig, connection: Connection<S>) -> Self {
        Self {
            scanner: Scanner::new(config.buffer_size),
            config,
            connection,
            state: SessionState::Connected,
            context: None,
            scanned_since_sync: false,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Context of the logged-in user
    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    /// Whether SYNC is currently allowed
    pub fn can_sync(&self) -> bool {
        self.state.is_logged_in() && self.scanned_since_sync
    }

    /// Log in as `user` and provision the local user directory.
    ///
    /// A directory that cannot be created is logged; the session goes on.
    pub async fn login(&mut self, user: UserName) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(Error::protocol(format!(
                "Login is only allowed once, session is {}",
                self.state
            )));
        }

        self.connection
            .send(&Message::Login {
                user: user.as_str().to_string(),
            })
            .await?;

        let context =
            SessionContext::new(user, &self.config.storage_root, self.config.manifests.clone());
        if let Err(e) = context.provision().await {
            warn!("{}", e);
        }
        info!("Logged in as {}", context.user);

        self.context = Some(context);
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Run SCAN: scan the local directory, persist the client manifest and
    /// upload it.
    pub async fn scan(&mut self) -> Result<ScanStats> {
        let context = self.logged_in()?.clone();
        self.state = SessionState::Scanning;

        self.connection
            .send(&Message::Command(Command::Scan))
            .await?;

        let outcome = self
            .scanner
            .scan(&context.user_root, &[context.manifests.client.as_str()])
            .await;
        let stats = match outcome {
            Ok(outcome) => {
                if let Err(e) = outcome.manifest.save(&context.client_manifest_path).await {
                    warn!("Failed to persist client manifest: {}", e);
                }
                outcome.stats
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                let mut stats = ScanStats::new();
                stats.errors += 1;
                stats
            }
        };

        // Sends a FileUnavailable notice instead when the manifest is missing
        match self
            .connection
            .send_file(&context.user_root, &context.manifests.client)
            .await?
        {
            TransferOutcome::Transferred { bytes, .. } => {
                debug!("Uploaded client manifest ({} bytes)", bytes);
            }
            TransferOutcome::Unavailable { reason, .. } => {
                warn!("Client manifest not uploaded: {}", reason);
            }
        }

        self.scanned_since_sync = true;
        self.state = SessionState::Idle;
        info!(
            "Scan done: {} files, {} bytes hashed",
            stats.files_scanned, stats.bytes_hashed
        );
        Ok(stats)
    }

    /// Run SYNC: answer every file request until the server ends the sync.
    ///
    /// Refused locally unless a SCAN happened since the previous SYNC.
    pub async fn sync(&mut self) -> Result<SyncStats> {
        let context = self.logged_in()?.clone();
        if !self.scanned_since_sync {
            return Err(Error::protocol("Run scan before sync"));
        }
        self.state = SessionState::Syncing;

        let started = Instant::now();
        let mut stats = SyncStats::new();
        self.connection
            .send(&Message::Command(Command::Sync))
            .await?;

        loop {
            match self.connection.receive().await? {
                Message::Command(Command::EndSync) => break,
                Message::RequestFile { path } => {
                    match self.connection.send_file(&context.user_root, &path).await? {
                        TransferOutcome::Transferred { bytes, .. } => {
                            stats.files_copied += 1;
                            stats.bytes_copied += bytes;
                        }
                        TransferOutcome::Unavailable { .. } => stats.files_skipped += 1,
                    }
                }
                other => {
                    return Err(Error::protocol(format!(
                        "Unexpected {} during sync",
                        other.kind()
                    )));
                }
            }
        }

        stats.duration = started.elapsed();
        self.scanned_since_sync = false;
        self.state = SessionState::Idle;
        info!(
            "Sync done: {} files sent ({} bytes), {} unavailable",
            stats.files_copied, stats.bytes_copied, stats.files_skipped
        );
        Ok(stats)
    }

    /// Run EXIT and close the connection
    pub async fn exit(mut self) -> Result<()> {
        if self.state.is_logged_in() {
            self.connection
                .send(&Message::Command(Command::Exit))
                .await?;
        }
        self.connection.shutdown().await?;
        self.state = SessionState::Disconnected;
        info!("Session closed");
        Ok(())
    }

    fn logged_in(&self) -> Result<&SessionContext> {
        match (&self.context, self.state) {
            (Some(context), SessionState::Idle) => Ok(context),
            (_, state) => Err(Error::protocol(format!(
                "Command not allowed while {}",
                state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};

    fn client(storage_root: PathBuf) -> (NetworkClient<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = duplex(256 * 1024);
        let config = ClientConfig {
            storage_root,
            ..ClientConfig::default()
        };
        let client = NetworkClient::with_connection(
            config,
            Connection::new(a, "server", FrameLimit::default(), BufferSize::default()),
        );
        let peer = Connection::new(b, "client", FrameLimit::default(), BufferSize::default());
        (client, peer)
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Config::default();
        assert_eq!(ClientConfig::from(&settings).server_addr, "127.0.0.1:7878");

        settings.client.server_addr = Some("backup.local:9000".to_string());
        assert_eq!(ClientConfig::from(&settings).server_addr, "backup.local:9000");
    }

    #[tokio::test]
    async fn test_commands_require_login() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, _peer) = client(temp_dir.path().to_path_buf());

        assert!(matches!(client.scan().await, Err(Error::Protocol { .. })));
        assert!(matches!(client.sync().await, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_sync_before_scan_never_reaches_server() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, mut peer) = client(temp_dir.path().to_path_buf());

        client.login(UserName::new("alice").unwrap()).await.unwrap();
        let result = client.sync().await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert_eq!(client.state(), SessionState::Idle);
        assert!(matches!(peer.receive().await.unwrap(), Message::Login { .. }));

        client.exit().await.unwrap();
        assert_eq!(
            peer.receive().await.unwrap(),
            Message::Command(Command::Exit)
        );
        assert!(peer.receive_opt().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_uploads_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let user_root = temp_dir.path().join("alice");
        tokio::fs::create_dir_all(&user_root).await.unwrap();
        tokio::fs::write(user_root.join("a.txt"), b"alpha").await.unwrap();
        let (mut client, mut peer) = client(temp_dir.path().to_path_buf());
        client.login(UserName::new("alice").unwrap()).await.unwrap();

        let stats = client.scan().await.unwrap();

        assert_eq!(stats.files_scanned, 1);
        assert!(client.can_sync());
        assert!(matches!(peer.receive().await.unwrap(), Message::Login { .. }));
        assert_eq!(
            peer.receive().await.unwrap(),
            Message::Command(Command::Scan)
        );
        let received = TempDir::new().unwrap();
        let destination = received.path().join("client.yaml");
        peer.receive_file_at(&destination).await.unwrap();
        let manifest = backsync_sync::Manifest::load(&destination).await.unwrap();
        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_file_named_like_end_sync_is_sent() {
        let temp_dir = TempDir::new().unwrap();
        let user_root = temp_dir.path().join("alice");
        tokio::fs::create_dir_all(&user_root).await.unwrap();
        tokio::fs::write(user_root.join("3"), b"three").await.unwrap();
        let (mut client, mut peer) = client(temp_dir.path().to_path_buf());
        client.login(UserName::new("alice").unwrap()).await.unwrap();
        client.scan().await.unwrap();

        let server = tokio::spawn(async move {
            let received = TempDir::new().unwrap();
            peer.receive().await.unwrap();
            peer.receive().await.unwrap();
            peer.receive_file_at(&received.path().join("client.yaml"))
                .await
                .unwrap();
            assert_eq!(peer.receive().await.unwrap(), Message::Command(Command::Sync));
            peer.send(&Message::RequestFile { path: "3".into() }).await.unwrap();
            let outcome = peer.receive_file(received.path()).await.unwrap();
            peer.send(&Message::Command(Command::EndSync)).await.unwrap();
            outcome
        });

        let stats = client.sync().await.unwrap();
        let outcome = server.await.unwrap();

        assert_eq!(stats.files_copied, 1);
        assert_eq!(
            outcome,
            TransferOutcome::Transferred {
                relative_path: "3".into(),
                bytes: 5
            }
        );
        assert!(!client.can_sync());
    }
}
