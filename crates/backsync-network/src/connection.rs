//! Framed message connection between the two peers

use crate::protocol::{decode_frame_len, encode_frame, Message, FRAME_HEADER_LEN};
use backsync_types::{BufferSize, Error, FrameLimit, Result};
use std::io;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Connection identifier
pub type ConnectionId = uuid::Uuid;

/// Connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Remote peer, as printed in logs
    pub peer: String,
    /// Connection established time
    pub established_at: Instant,
    /// Bytes sent, frames and payloads
    pub bytes_sent: u64,
    /// Bytes received, frames and payloads
    pub bytes_received: u64,
}

impl ConnectionInfo {
    fn new(peer: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            peer,
            established_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

/// Message stream over any async byte stream.
///
/// Frames are written and read strictly in order; nothing is buffered
/// across calls, so file payloads can follow a header on the same stream.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    info: ConnectionInfo,
    frame_limit: FrameLimit,
    buffer_size: BufferSize,
}

impl Connection<TcpStream> {
    /// Connect to `addr` over TCP
    pub async fn connect(
        addr: &str,
        frame_limit: FrameLimit,
        buffer_size: BufferSize,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        Ok(Self::new(stream, addr, frame_limit, buffer_size))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        frame_limit: FrameLimit,
        buffer_size: BufferSize,
    ) -> Self {
        Self {
            stream,
            info: ConnectionInfo::new(peer.into()),
            frame_limit,
            buffer_size,
        }
    }

    /// Connection information
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Chunk size used for payload streaming
    pub fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    /// Send one message as a frame
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = encode_frame(message, self.frame_limit)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| write_error("message", &e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| write_error("message", &e))?;
        self.info.bytes_sent += frame.len() as u64;
        trace!("Sent {} ({} bytes) to {}", message.kind(), frame.len(), self.info.peer);
        Ok(())
    }

    /// Receive the next message.
    ///
    /// Returns `None` when the peer closed the stream cleanly between two
    /// frames. A stream closed inside a frame is a connection error.
    pub async fn receive_opt(&mut self) -> Result<Option<Message>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let read = self
                .stream
                .read(&mut header[filled..])
                .await
                .map_err(|e| read_error("message length", &e))?;
            if read == 0 {
                if filled == 0 {
                    debug!("{} closed the connection", self.info.peer);
                    return Ok(None);
                }
                return Err(Error::connection("Connection closed inside a frame header"));
            }
            filled += read;
        }

        let len = decode_frame_len(header, self.frame_limit)?;
        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| read_error("message data", &e))?;
        self.info.bytes_received += (FRAME_HEADER_LEN + len) as u64;

        let message = Message::from_bytes(&body)?;
        trace!("Received {} ({} bytes) from {}", message.kind(), len, self.info.peer);
        Ok(Some(message))
    }

    /// Receive the next message, treating a closed stream as an error
    pub async fn receive(&mut self) -> Result<Message> {
        self.receive_opt()
            .await?
            .ok_or_else(|| Error::connection("Connection closed by peer"))
    }

    /// Stream exactly `size` bytes from `source` to the peer.
    ///
    /// The peer expects exactly `size` bytes, so a source that ends early
    /// leaves the stream unusable and is reported as a connection error.
    pub async fn send_payload<R>(&mut self, source: &mut R, size: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buffer = vec![0u8; self.buffer_size.get()];
        let mut remaining = size;

        while remaining > 0 {
            let want = chunk_len(remaining, buffer.len());
            let read = source.read(&mut buffer[..want]).await.map_err(|e| {
                Error::connection(format!(
                    "Source failed after {} of {} bytes: {}",
                    size - remaining,
                    size,
                    e
                ))
            })?;
            if read == 0 {
                return Err(Error::connection(format!(
                    "Source ended after {} of {} bytes",
                    size - remaining,
                    size
                )));
            }
            self.stream
                .write_all(&buffer[..read])
                .await
                .map_err(|e| write_error("payload", &e))?;
            remaining -= read as u64;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| write_error("payload", &e))?;

        self.info.bytes_sent += size;
        Ok(size)
    }

    /// Read exactly `size` payload bytes from the peer into `sink`.
    ///
    /// Every payload byte is consumed even when `sink` fails, so the stream
    /// stays aligned on the next frame; the first sink error is then
    /// returned. A short read is a connection error.
    pub async fn receive_payload<W>(&mut self, sink: &mut W, size: u64) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut buffer = vec![0u8; self.buffer_size.get()];
        let mut remaining = size;
        let mut sink_error: Option<io::Error> = None;

        while remaining > 0 {
            let want = chunk_len(remaining, buffer.len());
            let read = self
                .stream
                .read(&mut buffer[..want])
                .await
                .map_err(|e| read_error("payload", &e))?;
            if read == 0 {
                return Err(Error::connection(format!(
                    "Connection closed after {} of {} payload bytes",
                    size - remaining,
                    size
                )));
            }
            if sink_error.is_none() {
                if let Err(e) = sink.write_all(&buffer[..read]).await {
                    sink_error = Some(e);
                }
            }
            remaining -= read as u64;
        }
        self.info.bytes_received += size;

        if let Some(e) = sink_error {
            return Err(Error::io(format!("Failed to store payload: {}", e)));
        }
        sink.flush()
            .await
            .map_err(|e| Error::io(format!("Failed to store payload: {}", e)))?;
        Ok(size)
    }

    /// Read and discard `size` payload bytes
    pub async fn discard_payload(&mut self, size: u64) -> Result<()> {
        self.receive_payload(&mut tokio::io::sink(), size).await?;
        debug!("Discarded {} payload bytes from {}", size, self.info.peer);
        Ok(())
    }

    /// Flush and shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::connection(format!("Failed to shut down connection: {}", e)))
    }
}

fn chunk_len(remaining: u64, buffer_len: usize) -> usize {
    usize::try_from(remaining).map_or(buffer_len, |r| r.min(buffer_len))
}

fn read_error(what: &str, error: &io::Error) -> Error {
    Error::connection(format!("Failed to read {}: {}", what, error))
}

fn write_error(what: &str, error: &io::Error) -> Error {
    Error::connection(format!("Failed to write {}: {}", what, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let small = BufferSize::new(1024).unwrap();
        (
            Connection::new(a, "client", FrameLimit::default(), small),
            Connection::new(b, "server", FrameLimit::default(), small),
        )
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (mut client, mut server) = pair();

        client.send(&Message::Login { user: "alice".into() }).await.unwrap();
        client.send(&Message::Command(Command::Scan)).await.unwrap();

        assert_eq!(
            server.receive().await.unwrap(),
            Message::Login { user: "alice".into() }
        );
        assert_eq!(
            server.receive().await.unwrap(),
            Message::Command(Command::Scan)
        );
        assert_eq!(client.info().bytes_sent, server.info().bytes_received);
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (mut client, mut server) = pair();
        client.send(&Message::Command(Command::Exit)).await.unwrap();
        drop(client);

        assert!(server.receive_opt().await.unwrap().is_some());
        assert!(server.receive_opt().await.unwrap().is_none());
        assert!(matches!(server.receive().await, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_payload_follows_header() {
        let (mut client, mut server) = pair();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();

        let sender = tokio::spawn(async move {
            client.send_payload(&mut data.as_slice(), 5000).await.unwrap();
            client.send(&Message::Command(Command::EndSync)).await.unwrap();
            data
        });

        let mut received = Vec::new();
        server.receive_payload(&mut received, 5000).await.unwrap();
        let next = server.receive().await.unwrap();
        let data = sender.await.unwrap();

        assert_eq!(received, data);
        assert_eq!(next, Message::Command(Command::EndSync));
    }

    #[tokio::test]
    async fn test_short_payload_is_fatal() {
        let (mut client, mut server) = pair();

        let sender = tokio::spawn(async move {
            let result = client.send_payload(&mut &b"only ten b"[..], 100).await;
            assert!(matches!(result, Err(Error::Connection { .. })));
        });
        sender.await.unwrap();

        let result = server.receive_payload(&mut Vec::new(), 100).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
