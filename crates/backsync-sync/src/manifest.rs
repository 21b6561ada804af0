//! Fingerprint manifests and their persisted YAML form
//!
//! A manifest lists `(FilePath, FileHash)` pairs for one side of a user's
//! backup. On disk it is a YAML document:
//!
//! ```yaml
//! fileList:
//!   - FilePath: docs/a.txt
//!     FileHash: 9f64a747e1b97f131fabb6b447296c9b6f0201e79fb3c5356e6c77e89b6a806a
//! ```

use backsync_types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// One fingerprinted file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the user root, `/`-separated
    #[serde(rename = "FilePath")]
    pub relative_path: String,
    /// Hex digest of the file content
    #[serde(rename = "FileHash")]
    pub content_hash: String,
}

impl FileRecord {
    /// Create a new record
    pub fn new(relative_path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content_hash: content_hash.into(),
        }
    }
}

/// Ordered collection of [`FileRecord`]s, looked up by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "fileList", default)]
    records: Vec<FileRecord>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Callers keep paths unique.
    pub fn add(&mut self, record: FileRecord) {
        self.records.push(record);
    }

    /// Find the record stored under `path`
    pub fn find_by_path(&self, path: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.relative_path == path)
    }

    /// Remove the first record stored under `path`
    pub fn remove_by_path(&mut self, path: &str) -> Option<FileRecord> {
        let index = self.records.iter().position(|r| r.relative_path == path)?;
        Some(self.records.remove(index))
    }

    /// Drop every record whose path is in `paths`
    pub fn exclude<S: AsRef<str>>(&mut self, paths: &[S]) {
        let excluded: HashSet<&str> = paths.iter().map(AsRef::as_ref).collect();
        self.records
            .retain(|r| !excluded.contains(r.relative_path.as_str()));
    }

    /// Records in manifest order
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Iterate over records in manifest order
    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }

    /// Paths in manifest order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.relative_path.as_str())
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the manifest has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort records by path
    pub fn sort(&mut self) {
        self.records
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    }

    /// Serialize to the persisted YAML form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::serialization(format!("Failed to encode manifest: {}", e)))
    }

    /// Parse the persisted YAML form
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(data)
            .map_err(|e| Error::serialization(format!("Failed to decode manifest: {}", e)))
    }

    /// Write the manifest to `path`, replacing any previous content
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)
            .await
            .map_err(|e| Error::from_io_at(e, path))?;
        debug!("Saved manifest with {} records to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a manifest from `path`
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .await
            .map_err(|e| Error::from_io_at(e, path))?;
        let manifest = Self::from_bytes(&bytes)?;
        debug!("Loaded manifest with {} records from {}", manifest.len(), path.display());
        Ok(manifest)
    }
}

impl FromIterator<FileRecord> for Manifest {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        [
            FileRecord::new("a.txt", "H1"),
            FileRecord::new("docs/b.txt", "H2"),
            FileRecord::new("docs/deep/c.txt", "H3"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_find_and_remove() {
        let mut manifest = sample();

        assert_eq!(manifest.find_by_path("docs/b.txt").unwrap().content_hash, "H2");
        assert!(manifest.find_by_path("missing").is_none());

        let removed = manifest.remove_by_path("docs/b.txt").unwrap();
        assert_eq!(removed.content_hash, "H2");
        assert_eq!(manifest.len(), 2);
        assert!(manifest.remove_by_path("docs/b.txt").is_none());
    }

    #[test]
    fn test_exclude_drops_listed_paths() {
        let mut manifest = sample();
        manifest.add(FileRecord::new("client.yaml", "H9"));

        manifest.exclude(&["client.yaml", "server.yaml"]);

        assert_eq!(manifest.len(), 3);
        assert!(manifest.find_by_path("client.yaml").is_none());
    }

    #[test]
    fn test_persisted_shape() {
        let text = String::from_utf8(sample().to_bytes().unwrap()).unwrap();

        assert!(text.contains("fileList:"));
        assert!(text.contains("FilePath: docs/b.txt"));
        assert!(text.contains("FileHash: H2"));
    }

    #[test]
    fn test_empty_manifest_parses() {
        assert!(Manifest::from_bytes(b"fileList: []\n").unwrap().is_empty());
        assert!(Manifest::from_bytes(b"{}\n").unwrap().is_empty());
        assert!(Manifest::from_bytes(b"fileList: [oops").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.yaml");

        let manifest = sample();
        manifest.save(&path).await.unwrap();
        let loaded = Manifest::load(&path).await.unwrap();

        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn test_load_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let result = Manifest::load(temp_dir.path().join("client.yaml")).await;
        assert!(matches!(result, Err(Error::FileNotFound { .. })));
    }

    proptest! {
        #[test]
        fn test_round_trip_keeps_record_set(
            entries in proptest::collection::btree_map("[a-z][a-z0-9_/ -]{0,16}\\.[a-z]{1,4}", "[0-9a-f]{64}", 0..32)
        ) {
            let manifest: Manifest = entries
                .iter()
                .map(|(p, h)| FileRecord::new(p.clone(), h.clone()))
                .collect();

            let decoded = Manifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();

            let expected: HashSet<&FileRecord> = manifest.iter().collect();
            let actual: HashSet<&FileRecord> = decoded.iter().collect();
            prop_assert_eq!(expected, actual);
        }
    }
}
