//! Error types for the netpoll reactor

use core::fmt;
use std::os::fd::RawFd;

/// Result type for reactor operations
pub type NetResult<T> = Result<T, NetError>;

/// Errors surfaced by the reactor, demultiplexers and connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Demultiplexer kind string did not name a known backend
    UnknownDemuxKind(String),

    /// Demultiplexer kind is known but not available on this platform
    UnsupportedDemux,

    /// Shard count must be at least 1
    InvalidShardCount(usize),

    /// Some other configuration value is out of range
    InvalidConfig(&'static str),

    /// No handler registered for this descriptor
    HandlerNotFound(RawFd),

    /// Demultiplexer, reactor or connection already closed
    Closed,

    /// Work pool stopped accepting tasks
    PoolClosed,

    /// Buffer cursor operation failed
    Buffer(BufferError),

    /// Frame encode/decode failed
    Codec(CodecError),

    /// OS error with errno
    Os(i32),

    /// Listen address could not be parsed
    AddrParse(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::UnknownDemuxKind(kind) => write!(f, "demultiplexer kind unknown: {}", kind),
            NetError::UnsupportedDemux => write!(f, "demultiplexer not supported on this platform"),
            NetError::InvalidShardCount(n) => write!(f, "shard count must be >= 1 (got {})", n),
            NetError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            NetError::HandlerNotFound(fd) => write!(f, "handler not found for fd {}", fd),
            NetError::Closed => write!(f, "closed"),
            NetError::PoolClosed => write!(f, "work pool closed"),
            NetError::Buffer(e) => write!(f, "buffer error: {}", e),
            NetError::Codec(e) => write!(f, "codec error: {}", e),
            NetError::Os(errno) => write!(f, "OS error: {}", std::io::Error::from_raw_os_error(*errno)),
            NetError::AddrParse(addr) => write!(f, "invalid address: {}", addr),
        }
    }
}

impl std::error::Error for NetError {}

impl From<NetError> for std::io::Error {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Os(errno) => std::io::Error::from_raw_os_error(errno),
            NetError::Closed => std::io::Error::new(std::io::ErrorKind::NotConnected, e),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Buffer cursor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Fewer unread bytes than requested; cursors untouched
    DataNotEnough,

    /// Buffer holds no unread bytes at all
    Eof,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::DataNotEnough => write!(f, "data not enough"),
            BufferError::Eof => write!(f, "end of data"),
        }
    }
}

impl std::error::Error for BufferError {}

impl From<BufferError> for NetError {
    fn from(e: BufferError) -> Self {
        NetError::Buffer(e)
    }
}

/// Codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Not a whole frame buffered yet; retry once more bytes arrive
    NotEnoughData,

    /// Declared frame length exceeds the codec limit
    FrameTooLarge(usize),

    /// Frame header is malformed
    InvalidFrame(&'static str),
}

impl CodecError {
    /// True for the expected "wait for more bytes" outcome.
    #[inline]
    pub fn is_not_enough_data(&self) -> bool {
        matches!(self, CodecError::NotEnoughData)
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::NotEnoughData => write!(f, "not enough data"),
            CodecError::FrameTooLarge(n) => write!(f, "frame too large: {} bytes", n),
            CodecError::InvalidFrame(msg) => write!(f, "invalid frame: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<BufferError> for CodecError {
    fn from(_: BufferError) -> Self {
        CodecError::NotEnoughData
    }
}

impl From<CodecError> for NetError {
    fn from(e: CodecError) -> Self {
        NetError::Codec(e)
    }
}
