//! Frame codec capability.
//!
//! A codec turns application payloads into wire frames (`Encoder`) and
//! carves complete frames back out of a connection's read buffer
//! (`Decoder`). The core ships no wire format of its own; see
//! `netpoll_module::length_prefix` for the stock example.
//!
//! **Decoder contract:**
//! - On `Err(CodecError::NotEnoughData)` the buffer's cursors must be exactly
//!   where they were before the call. Use `Buffer::peek` to inspect headers
//!   and consume only once the whole frame is present.
//! - Any other error is treated as a broken stream by the connection.

use crate::buffer::Buffer;
use crate::error::CodecError;

/// Wraps an outgoing payload into a frame.
pub trait Encoder: Send + Sync {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Extracts one frame from the front of `buf`.
pub trait Decoder: Send + Sync {
    fn decode(&self, buf: &mut Buffer) -> Result<Vec<u8>, CodecError>;
}

/// Both halves together, as configured on a server.
pub trait Codec: Encoder + Decoder {}

impl<T: Encoder + Decoder> Codec for T {}
