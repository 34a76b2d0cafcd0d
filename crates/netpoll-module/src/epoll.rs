//! `EpollDemux` - default `Demultiplexer` on Linux.
//!
//! Interest bits are translated one-to-one into epoll flags; nothing is
//! added implicitly. An eventfd sits in the same epoll set under a reserved
//! token so `close` can wake a thread blocked in `wait`.
//!
//! The epoll instance lives in an `RwLock<Option<_>>`: registrations and
//! `wait` hold the read side, `close` takes the write side once the waiter
//! has been kicked out, then drops the kernel table.

use netpoll_core::demux::Demultiplexer;
use netpoll_core::error::{NetError, NetResult};
use netpoll_core::event::{Event, Interest};
use netpoll_core::{log_debug, log_trace};

use crate::eventfd_waker::EventFdWaker;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use parking_lot::{Mutex, RwLock};
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// Event data reserved for the waker; descriptors are never this large.
const WAKER_TOKEN: u64 = u64::MAX;

pub struct EpollDemux {
    epoll: RwLock<Option<Epoll>>,
    waker: EventFdWaker,
    /// Kernel-facing event array, reused across waits
    scratch: Mutex<Vec<EpollEvent>>,
    closed: AtomicBool,
}

impl EpollDemux {
    /// Create an epoll instance reporting up to `capacity` events per wait.
    pub fn new(capacity: usize) -> NetResult<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(errno)?;
        let waker = EventFdWaker::create()?;
        epoll
            .add(&waker, EpollEvent::new(EpollFlags::EPOLLIN, WAKER_TOKEN))
            .map_err(errno)?;

        let capacity = capacity.max(1);
        log_debug!("epoll created (capacity {})", capacity);

        Ok(Self {
            epoll: RwLock::new(Some(epoll)),
            waker,
            scratch: Mutex::new(vec![EpollEvent::empty(); capacity]),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Single wait pass bounded by `timeout_ms`. Returns 0 on timeout.
    pub fn wait_timeout(&self, events: &mut Vec<Event>, timeout_ms: u16) -> NetResult<usize> {
        self.wait_once(events, EpollTimeout::from(timeout_ms))
    }

    fn wait_once(&self, events: &mut Vec<Event>, timeout: EpollTimeout) -> NetResult<usize> {
        events.clear();
        if self.is_closed() {
            return Err(NetError::Closed);
        }

        let guard = self.epoll.read();
        let epoll = guard.as_ref().ok_or(NetError::Closed)?;
        let mut scratch = self.scratch.lock();

        let n = loop {
            match epoll.wait(&mut scratch, timeout) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(NetError::Os(e as i32)),
            }
        };

        for raw in &scratch[..n] {
            if raw.data() == WAKER_TOKEN {
                self.waker.drain();
                continue;
            }
            events.push(Event::new(raw.data() as RawFd, from_epoll(raw.events())));
        }

        if self.is_closed() {
            events.clear();
            return Err(NetError::Closed);
        }
        log_trace!("epoll wait returned {} events", events.len());
        Ok(events.len())
    }

    fn with_epoll<R>(&self, f: impl FnOnce(&Epoll) -> nix::Result<R>) -> NetResult<R> {
        let guard = self.epoll.read();
        let epoll = guard.as_ref().ok_or(NetError::Closed)?;
        f(epoll).map_err(errno)
    }
}

impl Demultiplexer for EpollDemux {
    fn add(&self, event: Event) -> NetResult<()> {
        let ev = EpollEvent::new(to_epoll(event.interest), event.fd as u64);
        // Safety: the caller keeps `event.fd` open for the duration of the call
        let fd = unsafe { BorrowedFd::borrow_raw(event.fd) };
        self.with_epoll(|ep| ep.add(fd, ev))
    }

    fn delete(&self, fd: RawFd) -> NetResult<()> {
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.with_epoll(|ep| ep.delete(fd))
    }

    fn modify(&self, event: Event) -> NetResult<()> {
        let mut ev = EpollEvent::new(to_epoll(event.interest), event.fd as u64);
        let fd = unsafe { BorrowedFd::borrow_raw(event.fd) };
        self.with_epoll(|ep| ep.modify(fd, &mut ev))
    }

    fn wait(&self, events: &mut Vec<Event>) -> NetResult<usize> {
        loop {
            let n = self.wait_once(events, EpollTimeout::NONE)?;
            // Only the waker fired: nothing to report yet
            if n > 0 {
                return Ok(n);
            }
        }
    }

    fn close(&self) -> NetResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.waker.wake()?;
        // Waiter (if any) observes `closed`, drops its read guard and returns
        let epoll = self.epoll.write().take();
        drop(epoll);
        log_debug!("epoll closed");
        Ok(())
    }
}

#[inline]
fn errno(e: Errno) -> NetError {
    NetError::Os(e as i32)
}

/// Registration interest to epoll flags.
pub fn to_epoll(interest: Interest) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if interest.intersects(Interest::READ) {
        flags |= EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI;
    }
    if interest.intersects(Interest::WRITE) {
        flags |= EpollFlags::EPOLLOUT;
    }
    if interest.intersects(Interest::CLOSE) {
        flags |= EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP;
    }
    if interest.intersects(Interest::ERROR) {
        flags |= EpollFlags::EPOLLERR;
    }
    if interest.intersects(Interest::EDGE) {
        flags |= EpollFlags::EPOLLET;
    }
    if interest.intersects(Interest::ONESHOT) {
        flags |= EpollFlags::EPOLLONESHOT;
    }
    flags
}

/// Reported epoll flags to readiness interest.
pub fn from_epoll(flags: EpollFlags) -> Interest {
    let mut interest = Interest::NONE;
    if flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI) {
        interest |= Interest::READ;
    }
    if flags.contains(EpollFlags::EPOLLOUT) {
        interest |= Interest::WRITE;
    }
    if flags.intersects(EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP) {
        interest |= Interest::CLOSE;
    }
    if flags.contains(EpollFlags::EPOLLERR) {
        interest |= Interest::ERROR;
    }
    interest
}
