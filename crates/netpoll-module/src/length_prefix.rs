//! `LengthPrefixCodec` - 4-byte big-endian length framing.
//!
//! ```text
//!  +----------------+------------------+
//!  | length (u32 BE)|     payload      |
//!  +----------------+------------------+
//!  length = 4 + payload.len()
//! ```
//!
//! Decoding peeks the header first and consumes nothing until the whole
//! frame is buffered.

use netpoll_core::buffer::Buffer;
use netpoll_core::codec::{Decoder, Encoder};
use netpoll_core::error::CodecError;

const HEADER_LEN: usize = 4;

/// Default upper bound on a frame, header included.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixCodec {
    max_frame: usize,
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// Reject frames whose declared length exceeds `max_frame`.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame: max_frame.max(HEADER_LEN) }
    }

    #[inline]
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for LengthPrefixCodec {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let total = HEADER_LEN + payload.len();
        if total > self.max_frame || total > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge(total));
        }
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

impl Decoder for LengthPrefixCodec {
    fn decode(&self, buf: &mut Buffer) -> Result<Vec<u8>, CodecError> {
        let header = buf.peek(HEADER_LEN)?;
        let total = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if total < HEADER_LEN {
            return Err(CodecError::InvalidFrame("length shorter than header"));
        }
        if total > self.max_frame {
            return Err(CodecError::FrameTooLarge(total));
        }
        if buf.len() < total {
            return Err(CodecError::NotEnoughData);
        }
        let payload = buf.read_at(HEADER_LEN, total - HEADER_LEN)?;
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ping() {
        let codec = LengthPrefixCodec::new();
        let frame = codec.encode(b"ping").unwrap();
        assert_eq!(frame, [0, 0, 0, 8, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn test_partial_frame_leaves_cursors() {
        let codec = LengthPrefixCodec::new();
        let mut buf = Buffer::with_capacity(16);

        buf.write(&[0, 0]);
        assert_eq!(codec.decode(&mut buf), Err(CodecError::NotEnoughData));
        assert_eq!((buf.start(), buf.end()), (0, 2));

        buf.write(&[0, 9, b'a', b'b']);
        assert_eq!(codec.decode(&mut buf), Err(CodecError::NotEnoughData));
        assert_eq!((buf.start(), buf.end()), (0, 6));

        buf.write(&[b'c', b'd', b'e']);
        assert_eq!(codec.decode(&mut buf).unwrap(), b"abcde");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunking_does_not_change_frames() {
        let codec = LengthPrefixCodec::new();
        let mut wire = Vec::new();
        for payload in [&b"ping"[..], b"", b"a longer payload", b"x"] {
            wire.extend(codec.encode(payload).unwrap());
        }

        let decode_all = |buf: &mut Buffer, out: &mut Vec<Vec<u8>>| loop {
            match codec.decode(buf) {
                Ok(frame) => out.push(frame),
                Err(e) => {
                    assert!(e.is_not_enough_data());
                    break;
                }
            }
        };

        let mut whole = Vec::new();
        let mut buf = Buffer::default();
        buf.write(&wire);
        decode_all(&mut buf, &mut whole);

        let mut trickled = Vec::new();
        let mut buf = Buffer::default();
        for byte in &wire {
            buf.write(std::slice::from_ref(byte));
            decode_all(&mut buf, &mut trickled);
        }

        assert_eq!(whole.len(), 4);
        assert_eq!(whole, trickled);
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let codec = LengthPrefixCodec::with_max_frame(64);
        let mut buf = Buffer::default();
        buf.write(&[0, 0, 0, 2]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::InvalidFrame(_))));

        let mut buf = Buffer::default();
        buf.write(&[0, 0, 1, 0]);
        assert_eq!(codec.decode(&mut buf), Err(CodecError::FrameTooLarge(256)));
        assert_eq!(codec.encode(&[0u8; 61]), Err(CodecError::FrameTooLarge(65)));
    }
}
