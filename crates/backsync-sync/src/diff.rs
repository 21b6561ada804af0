//! Reconciliation of a client manifest against a server manifest
//!
//! One pass over the client manifest decides what the server has to fetch.
//! Every server record the client still has is marked as it is matched;
//! whatever is left unmarked afterwards no longer exists on the client and
//! is deleted. A changed file is only re-copied, never also deleted.

use crate::manifest::Manifest;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Outcome of [`diff`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Paths the server must receive, in client-manifest order
    pub to_copy: Vec<String>,
    /// Paths the server must delete, in server-manifest order
    pub to_delete: Vec<String>,
}

impl DiffResult {
    /// Whether the two manifests already agree
    pub fn is_empty(&self) -> bool {
        self.to_copy.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute what the server must copy and delete.
///
/// The server manifest is read only; matches are tracked in a side table,
/// so the caller's snapshot stays usable afterwards.
pub fn diff(client: &Manifest, server: &Manifest) -> DiffResult {
    let records = server.records();

    // Server positions per path, in manifest order; the first occurrence is
    // matched first
    let mut index: HashMap<&str, VecDeque<usize>> = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        index
            .entry(record.relative_path.as_str())
            .or_default()
            .push_back(i);
    }

    let mut matched = vec![false; records.len()];
    let mut result = DiffResult::default();

    for record in client {
        let path = record.relative_path.as_str();
        // A later duplicate of this path must not match the same record
        let Some(i) = index.get_mut(path).and_then(VecDeque::pop_front) else {
            debug!("{}: new on client", path);
            result.to_copy.push(record.relative_path.clone());
            continue;
        };

        // Changed files are claimed too, so they are re-copied but never deleted
        matched[i] = true;
        if records[i].content_hash != record.content_hash {
            debug!("{}: content changed", path);
            result.to_copy.push(record.relative_path.clone());
        }
    }

    result.to_delete = records
        .iter()
        .zip(&matched)
        .filter(|(_, &m)| !m)
        .map(|(r, _)| r.relative_path.clone())
        .collect();

    debug!(
        "Diff: {} to copy, {} to delete",
        result.to_copy.len(),
        result.to_delete.len()
    );
    result
}
