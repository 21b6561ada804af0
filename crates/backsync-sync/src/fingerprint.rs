//! Content fingerprints used for change detection

use backsync_types::{BufferSize, Error, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Width of a fingerprint in hex characters
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Fingerprint of an in-memory byte sequence as lowercase hex
pub fn fingerprint_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Fingerprint of a file's content, read in `buffer_size` chunks.
///
/// Returns the digest together with the number of bytes hashed.
pub async fn fingerprint_file<P: AsRef<Path>>(
    path: P,
    buffer_size: BufferSize,
) -> Result<(String, u64)> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .await
        .map_err(|e| Error::from_io_at(e, path))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; buffer_size.get()];
    let mut total = 0u64;

    loop {
        let read = file.read(&mut buffer).await.map_err(|e| Error::Io {
            message: format!("Failed to read file '{}': {}", path.display(), e),
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hasher.finalize().to_hex().to_string(), total))
}
