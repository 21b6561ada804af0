//! Per-connection session state shared by both peers

use backsync_config::ManifestConfig;
use backsync_types::{Error, Result, UserName};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Session identifier
pub type SessionId = uuid::Uuid;

/// Where a session currently is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Stream open, no login yet
    Connected,
    /// Logged in and waiting for the next command
    Idle,
    /// Handling SCAN
    Scanning,
    /// Handling SYNC
    Syncing,
    /// Session over
    Disconnected,
}

impl SessionState {
    /// Whether a login has happened and the session is still open
    pub const fn is_logged_in(self) -> bool {
        matches!(self, Self::Idle | Self::Scanning | Self::Syncing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Syncing => "syncing",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// File names of the two per-user manifests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestNames {
    /// Manifest written by the client's scan
    pub client: String,
    /// Manifest written by the server's scan
    pub server: String,
}

impl ManifestNames {
    /// Both names, for excluding them from scans and diffs
    pub fn both(&self) -> [&str; 2] {
        [self.client.as_str(), self.server.as_str()]
    }
}

impl Default for ManifestNames {
    fn default() -> Self {
        ManifestConfig::default().into()
    }
}

impl From<ManifestConfig> for ManifestNames {
    fn from(config: ManifestConfig) -> Self {
        Self {
            client: config.client_manifest,
            server: config.server_manifest,
        }
    }
}

/// Everything a protocol step needs to know about the logged-in user
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Session identifier used in logs
    pub id: SessionId,
    /// Logged-in user
    pub user: UserName,
    /// `<storage_root>/<user>`
    pub user_root: PathBuf,
    /// Manifest file names inside `user_root`
    pub manifests: ManifestNames,
    /// Where the client manifest lives
    pub client_manifest_path: PathBuf,
    /// Where the server manifest lives
    pub server_manifest_path: PathBuf,
}

impl SessionContext {
    /// Build the context of `user` under `storage_root`
    pub fn new(user: UserName, storage_root: &Path, manifests: ManifestNames) -> Self {
        let user_root = user.root_in(storage_root);
        Self {
            id: uuid::Uuid::new_v4(),
            client_manifest_path: user_root.join(&manifests.client),
            server_manifest_path: user_root.join(&manifests.server),
            user,
            user_root,
            manifests,
        }
    }

    /// Create the user's root directory if it is missing
    pub async fn provision(&self) -> Result<()> {
        fs::create_dir_all(&self.user_root)
            .await
            .map_err(|e| Error::directory(&self.user_root, e.to_string()))?;
        debug!("Provisioned {}", self.user_root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let user = UserName::new("alice").unwrap();
        let context = SessionContext::new(user, Path::new("/srv/backup"), ManifestNames::default());

        assert_eq!(context.user_root, Path::new("/srv/backup/alice"));
        assert_eq!(
            context.client_manifest_path,
            Path::new("/srv/backup/alice/client.yaml")
        );
        assert_eq!(
            context.server_manifest_path,
            Path::new("/srv/backup/alice/server.yaml")
        );
        assert_eq!(context.manifests.both(), ["client.yaml", "server.yaml"]);
    }

    #[tokio::test]
    async fn test_provision_creates_user_root() {
        let temp_dir = TempDir::new().unwrap();
        let user = UserName::new("bob").unwrap();
        let context = SessionContext::new(user, temp_dir.path(), ManifestNames::default());

        context.provision().await.unwrap();
        context.provision().await.unwrap();

        assert!(temp_dir.path().join("bob").is_dir());
    }

    #[tokio::test]
    async fn test_provision_failure_is_non_fatal() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("carol"), b"").unwrap();
        let user = UserName::new("carol").unwrap();
        let context = SessionContext::new(user, temp_dir.path(), ManifestNames::default());

        let error = context.provision().await.unwrap_err();

        assert!(matches!(error, Error::Directory { .. }));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_logged_in_states() {
        assert!(!SessionState::Connected.is_logged_in());
        assert!(SessionState::Idle.is_logged_in());
        assert!(SessionState::Syncing.is_logged_in());
        assert!(!SessionState::Disconnected.is_logged_in());
    }
}
