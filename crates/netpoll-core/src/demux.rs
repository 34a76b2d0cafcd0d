//! Event demultiplexer abstraction.
//!
//! A `Demultiplexer` wraps one kernel readiness table (one epoll instance).
//! Exactly one event-loop thread calls `wait`; `add`/`delete`/`modify` may
//! be called from any thread at the same time.
//!
//! # Implementors
//!
//! - `EpollDemux` (Linux): wraps `epoll(7)`, with an eventfd used to wake a
//!   blocked `wait` on `close`.
//!
//! # Edge-triggered contract
//!
//! With `Interest::EDGE`, one notification is delivered per readiness
//! transition. A consumer that stops before the descriptor reports
//! would-block is not notified again until new activity arrives, even
//! though bytes remain. Consumers must drain to would-block.
//!
//! # One-shot contract
//!
//! With `Interest::ONESHOT`, the registration is disabled after one
//! delivered event and stays disabled until `modify` re-arms it. The
//! reactor relies on this to keep at most one handler in flight per
//! descriptor.

use crate::error::{NetError, NetResult};
use crate::event::Event;

use core::fmt;
use core::str::FromStr;
use std::os::fd::RawFd;

/// Readiness notification backend.
///
/// **Contract:**
/// - Interest bits are passed through verbatim; there is no implicit
///   level-triggered default and no automatic re-arm.
/// - `wait` blocks until at least one event is ready, retries on `EINTR`
///   internally, and returns `Err(NetError::Closed)` once `close` has run.
/// - `close` is idempotent.
pub trait Demultiplexer: Send + Sync {
    /// Register `event.fd` with `event.interest`.
    fn add(&self, event: Event) -> NetResult<()>;

    /// Remove `fd`. No event for it is reported afterwards.
    fn delete(&self, fd: RawFd) -> NetResult<()>;

    /// Replace the interest of an already registered descriptor.
    fn modify(&self, event: Event) -> NetResult<()>;

    /// Block until events are ready; replaces the contents of `events`.
    ///
    /// Returns the number of events written.
    fn wait(&self, events: &mut Vec<Event>) -> NetResult<usize>;

    /// Release the kernel table and wake any blocked `wait`.
    fn close(&self) -> NetResult<()>;
}

/// Available demultiplexer backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DemuxKind {
    #[default]
    Epoll,
}

impl DemuxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemuxKind::Epoll => "epoll",
        }
    }

    /// Whether this backend exists on the current target.
    pub fn is_supported(&self) -> bool {
        match self {
            DemuxKind::Epoll => cfg!(target_os = "linux"),
        }
    }
}

impl fmt::Display for DemuxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemuxKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" => Ok(DemuxKind::Epoll),
            other => Err(NetError::UnknownDemuxKind(other.to_string())),
        }
    }
}
