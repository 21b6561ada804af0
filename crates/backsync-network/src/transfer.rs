//! Whole-file transfer on top of a [`Connection`]

use crate::connection::Connection;
use crate::protocol::{FileDescriptor, Message};
use async_trait::async_trait;
use backsync_sync::resolve_under;
use backsync_types::{Error, Result};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// How a single file transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The whole file went across
    Transferred {
        /// Path relative to the user root
        relative_path: String,
        /// Payload size
        bytes: u64,
    },
    /// The sender could not read the file and said so instead
    Unavailable {
        /// Path relative to the user root
        relative_path: String,
        /// Sender's explanation
        reason: String,
    },
}

/// Sending and receiving whole files between peers
#[async_trait]
pub trait FileTransfer {
    /// Send the file stored at `relative_path` under `root`.
    ///
    /// A file that cannot be opened is answered with
    /// [`Message::FileUnavailable`] so the receiver never blocks on it.
    async fn send_file(&mut self, root: &Path, relative_path: &str) -> Result<TransferOutcome>;

    /// Receive one file and store it under `root` at the path it was sent as
    async fn receive_file(&mut self, root: &Path) -> Result<TransferOutcome>;

    /// Receive the file requested as `expected` and store it under `root`;
    /// any other file is drained and rejected
    async fn receive_file_as(&mut self, root: &Path, expected: &str) -> Result<TransferOutcome>;

    /// Receive one file and store it at `destination`
    async fn receive_file_at(&mut self, destination: &Path) -> Result<TransferOutcome>;
}

#[async_trait]
impl<S> FileTransfer for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_file(&mut self, root: &Path, relative_path: &str) -> Result<TransferOutcome> {
        let opened = match resolve_under(root, relative_path) {
            Ok(path) => open_for_send(&path).await,
            Err(e) => Err(e),
        };
        let (mut file, size) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Cannot send {}: {}", relative_path, e);
                let reason = e.to_string();
                self.send(&Message::FileUnavailable {
                    path: relative_path.to_string(),
                    reason: reason.clone(),
                })
                .await?;
                return Ok(TransferOutcome::Unavailable {
                    relative_path: relative_path.to_string(),
                    reason,
                });
            }
        };

        self.send(&Message::FileHeader(FileDescriptor::new(relative_path, size)))
            .await?;
        let bytes = self.send_payload(&mut file, size).await?;
        debug!("Sent {} ({} bytes)", relative_path, bytes);

        Ok(TransferOutcome::Transferred {
            relative_path: relative_path.to_string(),
            bytes,
        })
    }

    async fn receive_file(&mut self, root: &Path) -> Result<TransferOutcome> {
        let descriptor = match expect_file(self.receive().await?)? {
            Ok(descriptor) => descriptor,
            Err(unavailable) => return Ok(unavailable),
        };

        let destination = match resolve_under(root, &descriptor.relative_path) {
            Ok(path) => path,
            Err(e) => {
                self.discard_payload(descriptor.size).await?;
                return Err(e);
            }
        };

        store(self, &destination, descriptor).await
    }

    async fn receive_file_as(&mut self, root: &Path, expected: &str) -> Result<TransferOutcome> {
        let descriptor = match expect_file(self.receive().await?)? {
            Ok(descriptor) => descriptor,
            Err(TransferOutcome::Unavailable { relative_path, .. }) if relative_path != expected => {
                return Err(mismatch(expected, &relative_path));
            }
            Err(unavailable) => return Ok(unavailable),
        };

        if descriptor.relative_path != expected {
            self.discard_payload(descriptor.size).await?;
            return Err(mismatch(expected, &descriptor.relative_path));
        }

        store_under(self, root, descriptor).await
    }

    async fn receive_file_at(&mut self, destination: &Path) -> Result<TransferOutcome> {
        let descriptor = match expect_file(self.receive().await?)? {
            Ok(descriptor) => descriptor,
            Err(unavailable) => return Ok(unavailable),
        };

        store(self, destination, descriptor).await
    }
}

async fn open_for_send(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::from_io_at(e, path))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| Error::from_io_at(e, path))?;
    if !metadata.is_file() {
        return Err(Error::io(format!("{} is not a regular file", path.display())));
    }
    Ok((file, metadata.len()))
}

/// Split a message into a file header or an unavailability notice
fn expect_file(message: Message) -> Result<std::result::Result<FileDescriptor, TransferOutcome>> {
    match message {
        Message::FileHeader(descriptor) => Ok(Ok(descriptor)),
        Message::FileUnavailable { path, reason } => {
            warn!("Peer could not send {}: {}", path, reason);
            Ok(Err(TransferOutcome::Unavailable {
                relative_path: path,
                reason,
            }))
        }
        other => Err(Error::protocol(format!(
            "Expected a file header, got {}",
            other.kind()
        ))),
    }
}

fn mismatch(expected: &str, received: &str) -> Error {
    Error::protocol(format!("Requested {} but received {}", expected, received))
}

/// Store under `root` at the path named by the header
async fn store_under<S>(
    connection: &mut Connection<S>,
    root: &Path,
    descriptor: FileDescriptor,
) -> Result<TransferOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let destination = match resolve_under(root, &descriptor.relative_path) {
        Ok(path) => path,
        Err(e) => {
            connection.discard_payload(descriptor.size).await?;
            return Err(e);
        }
    };

    store(connection, &destination, descriptor).await
}

async fn store<S>(
    connection: &mut Connection<S>,
    destination: &Path,
    descriptor: FileDescriptor,
) -> Result<TransferOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Some(parent) = destination.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            connection.discard_payload(descriptor.size).await?;
            return Err(Error::directory(parent, e.to_string()));
        }
    }

    let mut file = match File::create(destination).await {
        Ok(file) => file,
        Err(e) => {
            connection.discard_payload(descriptor.size).await?;
            return Err(Error::from_io_at(e, destination));
        }
    };

    let bytes = connection
        .receive_payload(&mut file, descriptor.size)
        .await?;
    debug!(
        "Stored {} ({} bytes) at {}",
        descriptor.relative_path,
        bytes,
        destination.display()
    );

    Ok(TransferOutcome::Transferred {
        relative_path: descriptor.relative_path,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use backsync_types::{BufferSize, FrameLimit};
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = duplex(256 * 1024);
        (
            Connection::new(a, "client", FrameLimit::default(), BufferSize::default()),
            Connection::new(b, "server", FrameLimit::default(), BufferSize::default()),
        )
    }

    #[tokio::test]
    async fn test_file_lands_at_same_relative_path() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("docs")).await.unwrap();
        fs::write(source.path().join("docs/a.txt"), b"hello").await.unwrap();
        let (mut client, mut server) = pair();

        let sent = client.send_file(source.path(), "docs/a.txt").await.unwrap();
        let received = server.receive_file(target.path()).await.unwrap();

        assert_eq!(sent, received);
        assert_eq!(
            fs::read(target.path().join("docs/a.txt")).await.unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn test_empty_file() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("empty"), b"").await.unwrap();
        let (mut client, mut server) = pair();

        client.send_file(source.path(), "empty").await.unwrap();
        let received = server.receive_file(target.path()).await.unwrap();

        assert_eq!(
            received,
            TransferOutcome::Transferred {
                relative_path: "empty".into(),
                bytes: 0
            }
        );
        assert!(target.path().join("empty").is_file());
    }

    #[tokio::test]
    async fn test_missing_file_reported_as_unavailable() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let (mut client, mut server) = pair();

        let sent = client.send_file(source.path(), "gone.txt").await.unwrap();
        let received = server.receive_file(target.path()).await.unwrap();

        assert!(matches!(sent, TransferOutcome::Unavailable { .. }));
        assert!(matches!(
            received,
            TransferOutcome::Unavailable { ref relative_path, .. } if relative_path == "gone.txt"
        ));
    }

    #[tokio::test]
    async fn test_receive_at_explicit_destination() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("client.yaml"), b"fileList: []\n").await.unwrap();
        let destination = target.path().join("alice").join("client.yaml");
        let (mut client, mut server) = pair();

        client.send_file(source.path(), "client.yaml").await.unwrap();
        server.receive_file_at(&destination).await.unwrap();

        assert_eq!(fs::read(&destination).await.unwrap(), b"fileList: []\n");
    }

    #[tokio::test]
    async fn test_escaping_header_is_drained_and_rejected() {
        let target = TempDir::new().unwrap();
        let (mut client, mut server) = pair();

        client
            .send(&Message::FileHeader(FileDescriptor::new("../evil.txt", 4)))
            .await
            .unwrap();
        client.send_payload(&mut &b"evil"[..], 4).await.unwrap();
        client.send(&Message::Command(Command::EndSync)).await.unwrap();

        let result = server.receive_file(target.path()).await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert_eq!(
            server.receive().await.unwrap(),
            Message::Command(Command::EndSync)
        );
    }

    #[tokio::test]
    async fn test_uncreatable_destination_keeps_stream_aligned() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"payload").await.unwrap();
        // A regular file where the parent directory should be
        fs::write(target.path().join("blocked"), b"").await.unwrap();
        let (mut client, mut server) = pair();

        client.send_file(source.path(), "a.txt").await.unwrap();
        client.send(&Message::Command(Command::EndSync)).await.unwrap();

        let result = server
            .receive_file_at(&target.path().join("blocked").join("a.txt"))
            .await;

        assert!(result.is_err());
        assert!(!result.unwrap_err().is_fatal());
        assert_eq!(
            server.receive().await.unwrap(),
            Message::Command(Command::EndSync)
        );
    }

    #[tokio::test]
    async fn test_receive_as_requested_path() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"alpha").await.unwrap();
        let (mut client, mut server) = pair();

        client.send_file(source.path(), "a.txt").await.unwrap();
        let received = server.receive_file_as(target.path(), "a.txt").await.unwrap();

        assert_eq!(
            received,
            TransferOutcome::Transferred {
                relative_path: "a.txt".into(),
                bytes: 5
            }
        );
        assert_eq!(fs::read(target.path().join("a.txt")).await.unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_unrequested_file_is_never_written() {
        let target = TempDir::new().unwrap();
        fs::write(target.path().join("server.yaml"), b"fileList: []\n").await.unwrap();
        let (mut client, mut server) = pair();

        client
            .send(&Message::FileHeader(FileDescriptor::new("server.yaml", 7)))
            .await
            .unwrap();
        client.send_payload(&mut &b"garbage"[..], 7).await.unwrap();
        client.send(&Message::Command(Command::EndSync)).await.unwrap();

        let result = server.receive_file_as(target.path(), "a.txt").await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert_eq!(
            fs::read(target.path().join("server.yaml")).await.unwrap(),
            b"fileList: []\n"
        );
        assert!(!target.path().join("a.txt").exists());
        assert_eq!(
            server.receive().await.unwrap(),
            Message::Command(Command::EndSync)
        );
    }

    #[tokio::test]
    async fn test_unavailable_notice_for_other_path_is_rejected() {
        let target = TempDir::new().unwrap();
        let (mut client, mut server) = pair();

        client
            .send(&Message::FileUnavailable {
                path: "b.txt".into(),
                reason: "gone".into(),
            })
            .await
            .unwrap();

        assert!(matches!(
            server.receive_file_as(target.path(), "a.txt").await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_message_instead_of_file() {
        let target = TempDir::new().unwrap();
        let (mut client, mut server) = pair();

        client.send(&Message::Command(Command::Exit)).await.unwrap();

        assert!(matches!(
            server.receive_file(target.path()).await,
            Err(Error::Protocol { .. })
        ));
    }
}
