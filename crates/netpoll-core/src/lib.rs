//! # netpoll-core
//!
//! Core types and traits for the netpoll reactor.
//!
//! This crate holds nothing OS-specific beyond raw descriptor numbers.
//! The epoll-backed demultiplexer, the work pool and the buffer pool live in
//! `netpoll-module`; the reactor and connections live in `netpoll`.
//!
//! ## Modules
//!
//! - `event` - Readiness interest bitset and the `Event` value
//! - `buffer` - Growable byte buffer with peek/rollback cursors
//! - `codec` - Pluggable frame encoder/decoder capability
//! - `demux` - Event demultiplexer capability and kinds
//! - `error` - Error types
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod event;
pub mod buffer;
pub mod codec;
pub mod demux;
pub mod error;
pub mod log;
pub mod env;

// Re-exports for convenience
pub use event::{Event, EventHandler, Interest};
pub use buffer::Buffer;
pub use codec::{Codec, Decoder, Encoder};
pub use demux::{DemuxKind, Demultiplexer};
pub use error::{BufferError, CodecError, NetError, NetResult};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_key};

/// Constants shared across crates
pub mod constants {
    /// Capacity below which buffer growth doubles; above it grows by 25%.
    pub const GROWTH_THRESHOLD: usize = 4096;

    /// Capacity given to a zero-capacity buffer on first growth.
    pub const MIN_GROWTH: usize = 64;

    /// Prefix for every environment variable read by netpoll.
    pub const ENV_PREFIX: &str = "NETPOLL_";
}
