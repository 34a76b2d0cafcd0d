//! # netpoll-module - Default implementations
//!
//! This crate provides the default implementation for every netpoll
//! capability. Each one favours correctness and simplicity.
//!
//! ## Default stack
//!
//! | Capability      | Default Impl       | Notes                             |
//! |-----------------|--------------------|-----------------------------------|
//! | Demultiplexer   | EpollDemux         | Linux only; eventfd wake on close |
//! | Task execution  | WorkPool           | rendezvous channel, panic hook    |
//! | Buffer supply   | BufferPool         | lock-free free list               |
//! | Codec           | LengthPrefixCodec  | 4-byte big-endian length header   |

use netpoll_core::demux::{DemuxKind, Demultiplexer};
use netpoll_core::error::{NetError, NetResult};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
        pub mod eventfd_waker;

        pub use epoll::EpollDemux;
        pub use eventfd_waker::EventFdWaker;
    }
}

pub mod work_pool;
pub mod buffer_pool;
pub mod length_prefix;

pub use work_pool::{EventTask, PanicHook, Task, WorkPool};
pub use buffer_pool::BufferPool;
pub use length_prefix::LengthPrefixCodec;

/// Create a demultiplexer of `kind` with room for `capacity` events per wait.
pub fn new_demultiplexer(kind: DemuxKind, capacity: usize) -> NetResult<Box<dyn Demultiplexer>> {
    if !kind.is_supported() {
        return Err(NetError::UnsupportedDemux);
    }
    platform_demultiplexer(kind, capacity)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn platform_demultiplexer(kind: DemuxKind, capacity: usize) -> NetResult<Box<dyn Demultiplexer>> {
            match kind {
                DemuxKind::Epoll => Ok(Box::new(EpollDemux::new(capacity)?)),
            }
        }
    } else {
        fn platform_demultiplexer(_kind: DemuxKind, _capacity: usize) -> NetResult<Box<dyn Demultiplexer>> {
            Err(NetError::UnsupportedDemux)
        }
    }
}
