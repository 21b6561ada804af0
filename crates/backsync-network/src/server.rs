//! Server side of the backup protocol

use crate::connection::Connection;
use crate::protocol::{Command, Message};
use crate::session::{ManifestNames, SessionContext, SessionId, SessionState};
use crate::transfer::{FileTransfer, TransferOutcome};
use backsync_config::Config;
use backsync_sync::{delete_and_prune, diff, Manifest, Scanner};
use backsync_types::{BufferSize, Error, FrameLimit, Result, ScanStats, SyncStats, UserName};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before listening again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Network server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Directory holding one backup directory per user
    pub storage_root: PathBuf,
    /// Manifest file names inside each user directory
    pub manifests: ManifestNames,
    /// Chunk size for hashing and payload streaming
    pub buffer_size: BufferSize,
    /// Largest frame accepted from a client
    pub frame_limit: FrameLimit,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7878)),
            storage_root: PathBuf::from("backup"),
            manifests: ManifestNames::default(),
            buffer_size: BufferSize::default(),
            frame_limit: FrameLimit::default(),
        }
    }
}

impl TryFrom<&Config> for ServerConfig {
    type Error = Error;

    fn try_from(config: &Config) -> Result<Self> {
        let bind_addr = config.server.bind_addr.parse().map_err(|e| {
            Error::config(format!(
                "Invalid bind address '{}': {}",
                config.server.bind_addr, e
            ))
        })?;
        Ok(Self {
            bind_addr,
            storage_root: config.server.storage_root.clone(),
            manifests: config.manifest.clone().into(),
            buffer_size: config.transfer.buffer_size,
            frame_limit: config.transfer.frame_limit,
        })
    }
}

/// What happened during one client session
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session ID
    pub session_id: SessionId,
    /// Client address
    pub peer: String,
    /// User that logged in, if any
    pub user: Option<UserName>,
    /// Number of SCAN commands handled
    pub scans: u32,
    /// Number of SYNC commands handled
    pub syncs: u32,
    /// Statistics of the last server-side scan
    pub scan_stats: ScanStats,
    /// Statistics of all syncs, merged
    pub sync_stats: SyncStats,
}

impl SessionReport {
    fn new(peer: String) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            peer,
            user: None,
            scans: 0,
            syncs: 0,
            scan_stats: ScanStats::new(),
            sync_stats: SyncStats::new(),
        }
    }
}

/// Backup server accepting one client session at a time
#[derive(Debug)]
pub struct NetworkServer {
    config: ServerConfig,
    listener: TcpListener,
    scanner: Scanner,
}

impl NetworkServer {
    /// Bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            Error::connection(format!("Failed to bind to {}: {}", config.bind_addr, e))
        })?;
        info!(
            "Listening on {}, storing backups under {}",
            config.bind_addr,
            config.storage_root.display()
        );

        Ok(Self {
            scanner: Scanner::new(config.buffer_size),
            config,
            listener,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::connection(format!("Failed to read local address: {}", e)))
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve sessions one after another until the process ends.
    ///
    /// A failed accept is retried after [`ACCEPT_BACKOFF`].
    pub async fn run(&self) -> Result<()> {
        loop {
            let connection = match self.accept().await {
                Ok(connection) => connection,
                Err(e) => {
                    error!("{}, retrying in {:?}", e, ACCEPT_BACKOFF);
                    sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            match self.serve_connection(connection).await {
                Ok(report) => log_report(&report),
                Err(e) => error!("Session aborted: {}", e),
            }
        }
    }

    /// Accept one connection and serve it to the end
    pub async fn serve_one(&self) -> Result<SessionReport> {
        let connection = self.accept().await?;
        self.serve_connection(connection).await
    }

    async fn accept(&self) -> Result<Connection<TcpStream>> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::connection(format!("Failed to accept connection: {}", e)))?;
        let _ = stream.set_nodelay(true);
        info!("New client connection from {}", addr);

        Ok(Connection::new(
            stream,
            addr.to_string(),
            self.config.frame_limit,
            self.config.buffer_size,
        ))
    }

    /// Run the whole protocol on an established connection
    pub async fn serve_connection<S>(&self, mut connection: Connection<S>) -> Result<SessionReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut report = SessionReport::new(connection.info().peer.clone());

        let user = match connection.receive_opt().await? {
            Some(Message::Login { user }) => UserName::new(user)?,
            Some(other) => {
                return Err(Error::protocol(format!(
                    "Expected login from {}, got {}",
                    report.peer,
                    other.kind()
                )));
            }
            None => {
                info!("{} left before logging in", report.peer);
                return Ok(report);
            }
        };

        let context =
            SessionContext::new(user, &self.config.storage_root, self.config.manifests.clone());
        report.session_id = context.id;
        report.user = Some(context.user.clone());
        info!("[{}] {} logged in as {}", context.id, report.peer, context.user);
        if let Err(e) = context.provision().await {
            warn!("[{}] {}", context.id, e);
        }

        let mut state = SessionState::Idle;
        while state != SessionState::Disconnected {
            let command = match connection.receive_opt().await? {
                Some(Message::Command(command)) => command,
                Some(other) => {
                    return Err(Error::protocol(format!(
                        "Expected a command, got {}",
                        other.kind()
                    )));
                }
                None => {
                    info!("[{}] Client closed the connection", context.id);
                    break;
                }
            };
            debug!("[{}] Command {} ({})", context.id, command.name(), command);

            match command {
                Command::Scan => {
                    state = SessionState::Scanning;
                    let result = self.handle_scan(&mut connection, &context).await;
                    report.scans += 1;
                    match result {
                        Ok(stats) => report.scan_stats = stats,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!("[{}] Scan incomplete: {}", context.id, e),
                    }
                    state = SessionState::Idle;
                }
                Command::Sync => {
                    state = SessionState::Syncing;
                    let stats = self.handle_sync(&mut connection, &context).await?;
                    report.syncs += 1;
                    report.sync_stats.merge(&stats);
                    state = SessionState::Idle;
                }
                Command::Exit => {
                    info!("[{}] Client ended the session", context.id);
                    state = SessionState::Disconnected;
                }
                Command::EndSync => {
                    return Err(Error::protocol("END_SYNC is not a client command"));
                }
            }
        }

        Ok(report)
    }

    /// Scan the user's backup, persist the server manifest and receive the
    /// client manifest
    async fn handle_scan<S>(
        &self,
        connection: &mut Connection<S>,
        context: &SessionContext,
    ) -> Result<ScanStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let manifests = context.manifests.both();
        let stats = match self.scanner.scan(&context.user_root, &manifests).await {
            Ok(outcome) => {
                let mut manifest = outcome.manifest;
                manifest.exclude(&manifests);
                if let Err(e) = manifest.save(&context.server_manifest_path).await {
                    warn!("[{}] Failed to persist server manifest: {}", context.id, e);
                }
                outcome.stats
            }
            Err(e) => {
                warn!("[{}] Scan failed: {}", context.id, e);
                let mut stats = ScanStats::new();
                stats.errors += 1;
                stats
            }
        };

        match connection
            .receive_file_at(&context.client_manifest_path)
            .await?
        {
            TransferOutcome::Transferred { bytes, .. } => {
                info!(
                    "[{}] Scan done: {} files on server, client manifest {} bytes",
                    context.id, stats.files_scanned, bytes
                );
            }
            TransferOutcome::Unavailable { reason, .. } => {
                warn!("[{}] Client sent no manifest: {}", context.id, reason);
            }
        }

        Ok(stats)
    }

    /// Reconcile both manifests, delete stale files and pull the changed ones
    async fn handle_sync<S>(
        &self,
        connection: &mut Connection<S>,
        context: &SessionContext,
    ) -> Result<SyncStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let mut stats = SyncStats::new();

        let manifests = match self.load_manifests(context).await {
            Ok(manifests) => Some(manifests),
            Err(e) => {
                error!("[{}] Cannot sync: {}", context.id, e);
                stats.errors += 1;
                None
            }
        };

        if let Some((client, server)) = manifests {
            let plan = diff(&client, &server);
            info!(
                "[{}] Sync plan: {} to copy, {} to delete",
                context.id,
                plan.to_copy.len(),
                plan.to_delete.len()
            );

            for path in &plan.to_delete {
                match delete_and_prune(&context.user_root, path).await {
                    Ok(outcome) => {
                        stats.files_deleted += 1;
                        stats.directories_pruned += u64::from(outcome.directories_pruned);
                    }
                    Err(e) => {
                        warn!("[{}] Failed to delete {}: {}", context.id, path, e);
                        stats.errors += 1;
                    }
                }
            }

            for path in &plan.to_copy {
                connection
                    .send(&Message::RequestFile { path: path.clone() })
                    .await?;
                match connection.receive_file_as(&context.user_root, path).await {
                    Ok(TransferOutcome::Transferred { bytes, .. }) => {
                        stats.files_copied += 1;
                        stats.bytes_copied += bytes;
                    }
                    Ok(TransferOutcome::Unavailable { .. }) => stats.files_skipped += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("[{}] Failed to store {}: {}", context.id, path, e);
                        stats.errors += 1;
                    }
                }
            }
        }

        connection
            .send(&Message::Command(Command::EndSync))
            .await?;
        stats.duration = started.elapsed();
        info!(
            "[{}] Sync done: {} copied ({} bytes), {} deleted, {} skipped, {} errors",
            context.id,
            stats.files_copied,
            stats.bytes_copied,
            stats.files_deleted,
            stats.files_skipped,
            stats.errors
        );

        Ok(stats)
    }

    async fn load_manifests(&self, context: &SessionContext) -> Result<(Manifest, Manifest)> {
        let mut client = Manifest::load(&context.client_manifest_path).await?;
        // Backup copies of either manifest are never content
        client.exclude(&context.manifests.both());
        let server = Manifest::load(&context.server_manifest_path).await?;
        Ok((client, server))
    }
}

fn log_report(report: &SessionReport) {
    match &report.user {
        Some(user) => info!(
            "[{}] Session for {} ended: {} scans, {} syncs, {} files copied, {} deleted",
            report.session_id,
            user,
            report.scans,
            report.syncs,
            report.sync_stats.files_copied,
            report.sync_stats.files_deleted
        ),
        None => info!("[{}] Session from {} ended", report.session_id, report.peer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FileDescriptor;
    use tempfile::TempDir;
    use tokio::io::duplex;

    fn config(storage_root: PathBuf) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage_root,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Config::default();
        settings.server.bind_addr = "127.0.0.1:9000".to_string();
        settings.manifest.server_manifest = "srv.yaml".to_string();

        let config = ServerConfig::try_from(&settings).unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.manifests.server, "srv.yaml");
        assert_eq!(config.manifests.client, "client.yaml");
    }

    #[test]
    fn test_config_rejects_bad_address() {
        let mut settings = Config::default();
        settings.server.bind_addr = "nowhere".to_string();
        assert!(ServerConfig::try_from(&settings).is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_command_before_login_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let (a, b) = duplex(4096);
        let mut client = Connection::new(a, "client", FrameLimit::default(), BufferSize::default());
        let connection = Connection::new(b, "server", FrameLimit::default(), BufferSize::default());

        client.send(&Message::Command(Command::Scan)).await.unwrap();
        let result = server.serve_connection(connection).await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_invalid_user_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let (a, b) = duplex(4096);
        let mut client = Connection::new(a, "client", FrameLimit::default(), BufferSize::default());
        let connection = Connection::new(b, "server", FrameLimit::default(), BufferSize::default());

        client.send(&Message::Login { user: "../root".into() }).await.unwrap();
        let result = server.serve_connection(connection).await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert!(!temp_dir.path().join("root").exists());
    }

    #[tokio::test]
    async fn test_login_then_exit() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let (a, b) = duplex(4096);
        let mut client = Connection::new(a, "client", FrameLimit::default(), BufferSize::default());
        let connection = Connection::new(b, "server", FrameLimit::default(), BufferSize::default());

        client.send(&Message::Login { user: "alice".into() }).await.unwrap();
        client.send(&Message::Command(Command::Exit)).await.unwrap();
        let report = server.serve_connection(connection).await.unwrap();

        assert_eq!(report.user.unwrap().as_str(), "alice");
        assert_eq!(report.scans, 0);
        assert!(temp_dir.path().join("alice").is_dir());
    }

    #[tokio::test]
    async fn test_sync_without_manifests_still_ends() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let (a, b) = duplex(4096);
        let mut client = Connection::new(a, "client", FrameLimit::default(), BufferSize::default());
        let connection = Connection::new(b, "server", FrameLimit::default(), BufferSize::default());

        client.send(&Message::Login { user: "alice".into() }).await.unwrap();
        client.send(&Message::Command(Command::Sync)).await.unwrap();
        let session = tokio::spawn(async move { server.serve_connection(connection).await });

        assert_eq!(
            client.receive().await.unwrap(),
            Message::Command(Command::EndSync)
        );
        client.send(&Message::Command(Command::Exit)).await.unwrap();
        let report = session.await.unwrap().unwrap();

        assert_eq!(report.syncs, 1);
        assert_eq!(report.sync_stats.errors, 1);
    }

    #[tokio::test]
    async fn test_unrequested_file_cannot_overwrite_server_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let client_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let (a, b) = duplex(64 * 1024);
        let mut client = Connection::new(a, "client", FrameLimit::default(), BufferSize::default());
        let connection = Connection::new(b, "server", FrameLimit::default(), BufferSize::default());
        let session = tokio::spawn(async move { server.serve_connection(connection).await });

        let listing: Manifest = [backsync_sync::FileRecord::new(
            "a.txt",
            backsync_sync::fingerprint_bytes(b"alpha"),
        )]
        .into_iter()
        .collect();
        listing.save(client_dir.path().join("client.yaml")).await.unwrap();

        client.send(&Message::Login { user: "alice".into() }).await.unwrap();
        client.send(&Message::Command(Command::Scan)).await.unwrap();
        client.send_file(client_dir.path(), "client.yaml").await.unwrap();
        client.send(&Message::Command(Command::Sync)).await.unwrap();
        assert_eq!(
            client.receive().await.unwrap(),
            Message::RequestFile { path: "a.txt".into() }
        );
        client
            .send(&Message::FileHeader(FileDescriptor::new("server.yaml", 7)))
            .await
            .unwrap();
        client.send_payload(&mut &b"garbage"[..], 7).await.unwrap();

        let result = session.await.unwrap();

        assert!(matches!(result, Err(Error::Protocol { .. })));
        let server_manifest = temp_dir.path().join("alice").join("server.yaml");
        assert_ne!(tokio::fs::read(&server_manifest).await.unwrap(), b"garbage");
        assert!(Manifest::load(&server_manifest).await.unwrap().is_empty());
        assert!(!temp_dir.path().join("alice").join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_run_serves_sessions_back_to_back() {
        let temp_dir = TempDir::new().unwrap();
        let server = NetworkServer::bind(config(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let running = tokio::spawn(async move { server.run().await });

        for user in ["alice", "bob"] {
            let mut client =
                Connection::connect(&addr, FrameLimit::default(), BufferSize::default())
                    .await
                    .unwrap();
            client.send(&Message::Login { user: user.into() }).await.unwrap();
            client.send(&Message::Command(Command::Exit)).await.unwrap();
            assert!(client.receive_opt().await.unwrap().is_none());
        }
        running.abort();

        assert!(temp_dir.path().join("alice").is_dir());
        assert!(temp_dir.path().join("bob").is_dir());
    }
}
