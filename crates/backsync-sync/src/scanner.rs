//! Recursive directory scanning into a [`Manifest`]

use crate::fingerprint::fingerprint_file;
use crate::manifest::{FileRecord, Manifest};
use crate::paths::relative_key;
use backsync_types::{BufferSize, Error, Result, ScanStats};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of a scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Records of every file found, sorted by path
    pub manifest: Manifest,
    /// Counters collected along the way
    pub stats: ScanStats,
}

/// Walks a user root and fingerprints every regular file in it
#[derive(Debug, Clone, Copy, Default)]
pub struct Scanner {
    buffer_size: BufferSize,
}

impl Scanner {
    /// Create a scanner hashing with `buffer_size` chunks
    pub fn new(buffer_size: BufferSize) -> Self {
        Self { buffer_size }
    }

    /// Scan `root`, skipping files whose relative path is in `exclude`.
    ///
    /// A missing root is created and yields an empty manifest. Files that
    /// cannot be read are logged and left out.
    pub async fn scan<S: AsRef<str>>(&self, root: &Path, exclude: &[S]) -> Result<ScanOutcome> {
        let started = Instant::now();
        let mut stats = ScanStats::new();

        if !fs::try_exists(root).await.unwrap_or(false) {
            fs::create_dir_all(root)
                .await
                .map_err(|e| Error::directory(root, e.to_string()))?;
            info!("Created missing root {}", root.display());
        }

        let excluded: HashSet<&str> = exclude.iter().map(AsRef::as_ref).collect();
        let candidates = Self::walk(root, &excluded, &mut stats);
        let mut manifest = self.fingerprint_all(candidates, &mut stats).await;

        manifest.sort();
        stats.duration = started.elapsed();
        info!(
            "Scanned {} files in {} ({} excluded, {} errors)",
            stats.files_scanned,
            root.display(),
            stats.files_excluded,
            stats.errors
        );

        Ok(ScanOutcome { manifest, stats })
    }

    /// Collect every regular file under `root` with its manifest key
    fn walk(
        root: &Path,
        excluded: &HashSet<&str>,
        stats: &mut ScanStats,
    ) -> Vec<(String, PathBuf)> {
        let mut candidates = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    stats.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(key) = relative_key(root, entry.path()) else {
                warn!("Skipping non UTF-8 path {}", entry.path().display());
                stats.errors += 1;
                continue;
            };
            if excluded.contains(key.as_str()) {
                debug!("Excluding {}", key);
                stats.files_excluded += 1;
                continue;
            }
            candidates.push((key, entry.into_path()));
        }

        candidates
    }

    /// Hash every candidate; one that can no longer be read is skipped
    async fn fingerprint_all(
        &self,
        candidates: Vec<(String, PathBuf)>,
        stats: &mut ScanStats,
    ) -> Manifest {
        let mut manifest = Manifest::new();

        for (key, path) in candidates {
            match fingerprint_file(&path, self.buffer_size).await {
                Ok((hash, size)) => {
                    debug!("Fingerprinted {} ({} bytes)", key, size);
                    stats.files_scanned += 1;
                    stats.bytes_hashed += size;
                    manifest.add(FileRecord::new(key, hash));
                }
                Err(e) => {
                    warn!("Skipping {}: {}", key, e);
                    stats.errors += 1;
                }
            }
        }

        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_bytes;
    use tempfile::TempDir;

    async fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_nested_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "a.txt", b"alpha").await;
        write(root, "docs/b.txt", b"beta").await;
        write(root, "docs/deep/c.txt", b"gamma").await;
        fs::create_dir_all(root.join("empty")).await.unwrap();

        let outcome = Scanner::default().scan::<&str>(root, &[]).await.unwrap();
        let paths: Vec<&str> = outcome.manifest.paths().collect();

        assert_eq!(paths, vec!["a.txt", "docs/b.txt", "docs/deep/c.txt"]);
        assert_eq!(
            outcome.manifest.find_by_path("docs/b.txt").unwrap().content_hash,
            fingerprint_bytes(b"beta")
        );
        assert_eq!(outcome.stats.files_scanned, 3);
        assert_eq!(outcome.stats.bytes_hashed, 14);
    }

    #[tokio::test]
    async fn test_scan_excludes_own_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "a.txt", b"alpha").await;

        let first = Scanner::default().scan(root, &["client.yaml"]).await.unwrap();
        first.manifest.save(root.join("client.yaml")).await.unwrap();

        let second = Scanner::default().scan(root, &["client.yaml"]).await.unwrap();

        assert!(second.manifest.find_by_path("client.yaml").is_none());
        assert_eq!(second.manifest, first.manifest);
        assert_eq!(second.stats.files_excluded, 1);
    }

    #[tokio::test]
    async fn test_scan_creates_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("alice");

        let outcome = Scanner::default().scan::<&str>(&root, &[]).await.unwrap();

        assert!(outcome.manifest.is_empty());
        assert!(root.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_skips_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "real.txt", b"data").await;
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

        let outcome = Scanner::default().scan::<&str>(root, &[]).await.unwrap();

        assert_eq!(outcome.manifest.paths().collect::<Vec<_>>(), vec!["real.txt"]);
    }

    #[tokio::test]
    async fn test_scan_skips_file_that_vanished_before_hashing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "a.txt", b"alpha").await;
        write(root, "docs/gone.txt", b"soon deleted").await;
        write(root, "docs/z.txt", b"zeta").await;

        let mut stats = ScanStats::new();
        let candidates = Scanner::walk(root, &HashSet::new(), &mut stats);
        assert_eq!(candidates.len(), 3);
        fs::remove_file(root.join("docs/gone.txt")).await.unwrap();

        let mut manifest = Scanner::default().fingerprint_all(candidates, &mut stats).await;
        manifest.sort();

        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["a.txt", "docs/z.txt"]);
        assert_eq!(stats.files_scanned, 2);
        assert_eq!(stats.errors, 1);
    }
}
