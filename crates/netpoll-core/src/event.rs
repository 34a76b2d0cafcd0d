//! Readiness events.
//!
//! An `Event` pairs a descriptor with an `Interest` bitset. The same type is
//! used in both directions: callers pass it to a demultiplexer to register
//! interest, and the demultiplexer hands it back to report readiness.
//!
//! `EDGE` and `ONESHOT` are registration modifiers only; they never appear
//! on a reported event.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::fd::RawFd;

/// Readiness interest bitset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u32);

impl Interest {
    /// No bits set.
    pub const NONE: Interest = Interest(0);
    /// Ready to read, including priority / out-of-band data.
    pub const READ: Interest = Interest(1 << 0);
    /// Ready to write.
    pub const WRITE: Interest = Interest(1 << 1);
    /// Peer hung up or half-closed.
    pub const CLOSE: Interest = Interest(1 << 2);
    /// Error condition on the descriptor.
    pub const ERROR: Interest = Interest(1 << 3);
    /// Edge-triggered delivery.
    pub const EDGE: Interest = Interest(1 << 4);
    /// Disable the registration after one delivered event.
    pub const ONESHOT: Interest = Interest(1 << 5);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Interest(bits & 0x3f)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// True if any bit of `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn union(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    #[inline]
    pub const fn without(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, rhs: Interest) -> Interest {
        self.union(rhs)
    }
}

impl BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    #[inline]
    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Display for Interest {
    /// Comma-joined readiness names, e.g. `read,write`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Interest, &str); 6] = [
            (Interest::READ, "read"),
            (Interest::WRITE, "write"),
            (Interest::CLOSE, "close"),
            (Interest::ERROR, "error"),
            (Interest::EDGE, "et"),
            (Interest::ONESHOT, "oneshot"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.intersects(bit) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interest({})", self)
    }
}

/// A descriptor plus interest bits. Copied by value through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub interest: Interest,
}

impl Event {
    #[inline]
    pub const fn new(fd: RawFd, interest: Interest) -> Self {
        Self { fd, interest }
    }

    #[inline]
    pub const fn is_read(&self) -> bool {
        self.interest.intersects(Interest::READ)
    }

    #[inline]
    pub const fn is_write(&self) -> bool {
        self.interest.intersects(Interest::WRITE)
    }

    #[inline]
    pub const fn is_close(&self) -> bool {
        self.interest.intersects(Interest::CLOSE)
    }

    #[inline]
    pub const fn is_error(&self) -> bool {
        self.interest.intersects(Interest::ERROR)
    }
}

/// Callback invoked by the reactor (via the work pool) for a ready event.
///
/// Never called directly by application code.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: Event);

    /// Called on the event-loop thread before `event` is queued for
    /// `handle_event`. Returning `false` drops the dispatch; the handler
    /// takes over the event itself (e.g. folds it into one already running).
    fn claim(&self, _event: Event) -> bool {
        true
    }
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync,
{
    fn handle_event(&self, event: Event) {
        self(event)
    }
}
