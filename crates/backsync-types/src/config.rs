//! Validated configuration values shared by the sync and network crates

/// Buffer size used for hashing and streaming file payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct BufferSize(usize);

impl BufferSize {
    /// Minimum buffer size (1KB)
    pub const MIN: usize = 1024;
    /// Maximum buffer size (16MB)
    pub const MAX: usize = 16 * 1024 * 1024;
    /// Default buffer size (64KB)
    pub const DEFAULT: usize = 64 * 1024;

    /// Create a new buffer size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err(format!("Buffer size {} is below minimum {}", size, Self::MIN))
        } else if size > Self::MAX {
            Err(format!("Buffer size {} exceeds maximum {}", size, Self::MAX))
        } else if !size.is_power_of_two() {
            Err(format!("Buffer size {} must be a power of two", size))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the buffer size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for BufferSize {
    type Error = String;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<BufferSize> for usize {
    fn from(size: BufferSize) -> Self {
        size.0
    }
}

/// Upper bound for a single framed protocol message.
///
/// File payloads are streamed outside of frames and are not limited by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct FrameLimit(usize);

impl FrameLimit {
    /// Smallest accepted limit (4KB)
    pub const MIN: usize = 4 * 1024;
    /// Default limit (1MB)
    pub const DEFAULT: usize = 1024 * 1024;

    /// Create a new frame limit with validation
    pub fn new(limit: usize) -> Result<Self, String> {
        if limit < Self::MIN {
            Err(format!("Frame limit {} is below minimum {}", limit, Self::MIN))
        } else if u32::try_from(limit).is_err() {
            Err(format!("Frame limit {} does not fit a u32 length prefix", limit))
        } else {
            Ok(Self(limit))
        }
    }

    /// Get the limit in bytes
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for FrameLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for FrameLimit {
    type Error = String;

    fn try_from(limit: usize) -> Result<Self, Self::Error> {
        Self::new(limit)
    }
}

impl From<FrameLimit> for usize {
    fn from(limit: FrameLimit) -> Self {
        limit.0
    }
}
