//! Deletion of stale backup files with shallow directory pruning
//!
//! After a file is removed its parent directory is removed too when it is
//! left empty, followed by a single best-effort attempt on the grandparent.
//! Pruning never climbs further and never removes the user root.

use crate::paths::resolve_under;
use backsync_types::{Error, Result};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// What a single [`delete_and_prune`] call removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Number of directories removed after the file (0 to 2)
    pub directories_pruned: u32,
}

/// Delete `relative_path` under `root` and prune what it leaves empty.
///
/// Failing to delete the file is an error. Failing to remove the parent is
/// logged and otherwise ignored, the grandparent attempt is silent.
pub async fn delete_and_prune(root: &Path, relative_path: &str) -> Result<PruneOutcome> {
    let path = resolve_under(root, relative_path)?;
    fs::remove_file(&path)
        .await
        .map_err(|e| Error::from_io_at(e, &path))?;
    debug!("Deleted {}", relative_path);

    let mut outcome = PruneOutcome::default();
    let Some(parent) = path.parent().filter(|p| *p != root && p.starts_with(root)) else {
        return Ok(outcome);
    };

    match is_empty_dir(parent).await {
        Ok(true) => {}
        Ok(false) => return Ok(outcome),
        Err(e) => {
            warn!("{}", Error::directory(parent, e.to_string()));
            return Ok(outcome);
        }
    }

    if let Err(e) = fs::remove_dir(parent).await {
        warn!("{}", Error::directory(parent, e.to_string()));
        return Ok(outcome);
    }
    outcome.directories_pruned += 1;
    debug!("Pruned empty directory {}", parent.display());

    if let Some(grandparent) = parent.parent().filter(|p| *p != root && p.starts_with(root)) {
        // Usually fails because the directory still has content
        if remove_dir_best_effort(grandparent).await.is_ok() {
            outcome.directories_pruned += 1;
            debug!("Pruned empty directory {}", grandparent.display());
        }
    }

    Ok(outcome)
}

async fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

async fn remove_dir_best_effort(dir: &Path) -> io::Result<()> {
    fs::remove_dir(dir).await
}
