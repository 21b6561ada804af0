//! Relative path keys and their safe resolution under a user root
//!
//! Manifests and wire messages carry paths as `/`-separated keys relative to
//! the user's root. Keys coming from the peer are untrusted and are resolved
//! only when they stay inside that root.

use backsync_types::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Build the manifest key of `path` relative to `root`.
///
/// Returns `None` for paths outside `root`, for `root` itself and for
/// components that are not valid UTF-8.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a manifest key to a path under `root`.
///
/// Rejects empty keys, absolute keys, `.`/`..` segments and any existing
/// symlink along the way.
pub fn resolve_under(root: &Path, key: &str) -> Result<PathBuf> {
    if key.is_empty() {
        return Err(Error::protocol("empty relative path"));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(Error::protocol(format!("absolute path not allowed: {}", key)));
    }

    let mut candidate = root.to_path_buf();
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::protocol(format!(
                "path segment '{}' not allowed in {}",
                segment, key
            )));
        }
        let mut components = Path::new(segment).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::protocol(format!("path escapes root: {}", key)));
        }

        candidate.push(segment);
        if let Ok(meta) = std::fs::symlink_metadata(&candidate) {
            if meta.file_type().is_symlink() {
                return Err(Error::protocol(format!(
                    "symlink in path (not following): {}",
                    candidate.display()
                )));
            }
        }
    }

    Ok(candidate)
}
