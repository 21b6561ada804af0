use backsync_network::{
    ClientConfig, ManifestNames, NetworkClient, NetworkServer, ServerConfig, SessionReport,
};
use backsync_types::{Result, UserName};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Test data generation patterns
#[derive(Debug, Clone, Copy)]
pub enum TestDataPattern {
    /// All zeros
    Zeros,
    /// Deterministic pseudo-random bytes
    Random,
    /// Text-like repeating structure
    Realistic,
}

/// Generate `size` bytes following `pattern`, varied by `seed`
pub fn generate_test_data(size: usize, pattern: TestDataPattern, seed: u64) -> Vec<u8> {
    match pattern {
        TestDataPattern::Zeros => vec![0u8; size],
        TestDataPattern::Random => {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};

            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            (0..size)
                .map(|i| {
                    i.hash(&mut hasher);
                    (hasher.finish() % 256) as u8
                })
                .collect()
        }
        TestDataPattern::Realistic => (0..size)
            .map(|i| ((i as u64 * 7 + 13 + seed) % 256) as u8)
            .collect(),
    }
}

/// Scratch storage for one client and one server
pub struct TestEnvironment {
    /// Server storage root
    pub server_dir: TempDir,
    /// Client storage root
    pub client_dir: TempDir,
    /// Manifest names used by both peers
    pub manifests: ManifestNames,
}

impl TestEnvironment {
    /// Create empty storage roots for both peers
    pub fn new() -> Self {
        Self {
            server_dir: TempDir::new().expect("Failed to create server dir"),
            client_dir: TempDir::new().expect("Failed to create client dir"),
            manifests: ManifestNames::default(),
        }
    }

    /// `<client storage>/<user>`
    pub fn client_root(&self, user: &str) -> PathBuf {
        self.client_dir.path().join(user)
    }

    /// `<server storage>/<user>`
    pub fn server_root(&self, user: &str) -> PathBuf {
        self.server_dir.path().join(user)
    }

    /// Server configuration bound to an ephemeral loopback port
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage_root: self.server_dir.path().to_path_buf(),
            manifests: self.manifests.clone(),
            ..ServerConfig::default()
        }
    }

    /// Client configuration pointing at `addr`
    pub fn client_config(&self, addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_addr: addr.to_string(),
            storage_root: self.client_dir.path().to_path_buf(),
            manifests: self.manifests.clone(),
            ..ClientConfig::default()
        }
    }

    /// Bind a server and serve exactly one session in the background
    pub async fn spawn_server(&self) -> (SocketAddr, JoinHandle<Result<SessionReport>>) {
        let server = NetworkServer::bind(self.server_config())
            .await
            .expect("Failed to bind server");
        let addr = server.local_addr().expect("Failed to read server address");
        let handle = tokio::spawn(async move { server.serve_one().await });
        (addr, handle)
    }

    /// Connect and log in as `user`
    pub async fn connect(&self, addr: SocketAddr, user: &str) -> NetworkClient {
        let mut client = NetworkClient::connect(self.client_config(addr))
            .await
            .expect("Failed to connect");
        client
            .login(UserName::new(user).expect("Invalid user name"))
            .await
            .expect("Failed to log in");
        client
    }

    /// One complete session: login, scan, sync, exit
    pub async fn backup(&self, user: &str) -> SessionReport {
        let (addr, server) = self.spawn_server().await;
        let mut client = self.connect(addr, user).await;
        client.scan().await.expect("Scan failed");
        client.sync().await.expect("Sync failed");
        client.exit().await.expect("Exit failed");
        server
            .await
            .expect("Server task panicked")
            .expect("Server session failed")
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `content` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, content).expect("Failed to write test file");
}

/// Every regular file under `root` with its content, keyed by `/` path,
/// leaving out the given manifest names
pub fn read_tree(root: &Path, manifests: &ManifestNames) -> BTreeMap<String, Vec<u8>> {
    let excluded = manifests.both();
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let key = backsync_sync::relative_key(root, entry.path())?;
            if excluded.contains(&key.as_str()) {
                return None;
            }
            let content = fs::read(entry.path()).ok()?;
            Some((key, content))
        })
        .collect()
}
