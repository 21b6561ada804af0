//! Wire messages exchanged between client and server
//!
//! Every message travels as one frame: a 4-byte big-endian length followed
//! by the bincode encoding of a [`Message`]. A [`Message::FileHeader`] frame
//! is immediately followed by `size` raw payload bytes outside any frame.
//! A [`Command`] is encoded as its numeric code, 1 to 4.

use backsync_types::{Error, FrameLimit, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the length prefix in front of every frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Session commands with their numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Command {
    /// Both peers scan their roots; the client uploads its manifest
    Scan,
    /// The server reconciles the manifests and pulls changed files
    Sync,
    /// The server has requested every file of the current sync
    EndSync,
    /// The client ends the session
    Exit,
}

impl Command {
    /// Numeric code of the command
    pub const fn code(self) -> u8 {
        match self {
            Self::Scan => 1,
            Self::Sync => 2,
            Self::EndSync => 3,
            Self::Exit => 4,
        }
    }

    /// Command for a numeric code
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Scan),
            2 => Some(Self::Sync),
            3 => Some(Self::EndSync),
            4 => Some(Self::Exit),
            _ => None,
        }
    }

    /// Lowercase name of the command
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Sync => "sync",
            Self::EndSync => "end_sync",
            Self::Exit => "exit",
        }
    }

    /// Whether a client may issue this command
    pub const fn is_client_command(self) -> bool {
        !matches!(self, Self::EndSync)
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command.code()
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code)
            .ok_or_else(|| Error::protocol(format!("Unknown command code: {}", code)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Accepts the decimal code or the command name, case-insensitively
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Self::try_from(code);
        }
        match s.to_ascii_lowercase().as_str() {
            "scan" => Ok(Self::Scan),
            "sync" => Ok(Self::Sync),
            "end_sync" | "endsync" => Ok(Self::EndSync),
            "exit" => Ok(Self::Exit),
            _ => Err(Error::protocol(format!("Unknown command: {}", s))),
        }
    }
}

/// Header announcing a file payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the sender's user root, `/`-separated
    pub relative_path: String,
    /// Number of payload bytes following the header
    pub size: u64,
}

impl FileDescriptor {
    /// Create a new descriptor
    pub fn new(relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
        }
    }
}

/// One framed protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First message of every session
    Login {
        /// Requested user namespace
        user: String,
    },
    /// Session command
    Command(Command),
    /// Server asks the client for one file during a sync
    RequestFile {
        /// Requested path relative to the user root
        path: String,
    },
    /// A file payload follows
    FileHeader(FileDescriptor),
    /// The requested file could not be read
    FileUnavailable {
        /// Requested path relative to the user root
        path: String,
        /// Why it could not be sent
        reason: String,
    },
}

impl Message {
    /// Short label for logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Command(_) => "command",
            Self::RequestFile { .. } => "file request",
            Self::FileHeader(_) => "file header",
            Self::FileUnavailable { .. } => "file unavailable",
        }
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::serialization(format!("Failed to encode message: {}", e)))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (message, read) =
            bincode::serde::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| Error::protocol(format!("Failed to decode message: {}", e)))?;
        if read != data.len() {
            return Err(Error::protocol(format!(
                "Trailing {} bytes after message",
                data.len() - read
            )));
        }
        Ok(message)
    }
}

/// Encode `message` as a complete frame
pub fn encode_frame(message: &Message, limit: FrameLimit) -> Result<Vec<u8>> {
    let body = message.to_bytes()?;
    if body.len() > limit.get() {
        return Err(Error::protocol(format!(
            "Message too large: {} bytes (limit {})",
            body.len(),
            limit.get()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| Error::protocol("Message length does not fit the frame header"))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Body length announced by a frame header
pub fn decode_frame_len(header: [u8; FRAME_HEADER_LEN], limit: FrameLimit) -> Result<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > limit.get() {
        return Err(Error::protocol(format!(
            "Message too large: {} bytes (limit {})",
            len,
            limit.get()
        )));
    }
    Ok(len)
}
