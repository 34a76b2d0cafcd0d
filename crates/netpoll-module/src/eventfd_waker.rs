//! `EventFdWaker` - wakes a thread blocked in `epoll_wait`.
//!
//! The eventfd is registered level-triggered in the epoll set it guards.
//! Writes coalesce (eventfd counter semantics), so waking twice before the
//! loop drains costs nothing extra.

use netpoll_core::error::{NetError, NetResult};

use nix::errno::Errno;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

pub struct EventFdWaker {
    fd: OwnedFd,
}

impl EventFdWaker {
    /// Create a non-blocking, close-on-exec eventfd.
    pub fn create() -> NetResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(NetError::Os(Errno::last() as i32));
        }
        // Safety: eventfd just returned this descriptor and nothing else owns it
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Bump the counter, making the fd readable.
    pub fn wake(&self) -> NetResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        match Errno::result(ret) {
            Ok(_) => Ok(()),
            // Counter saturated: a wake is already pending
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(NetError::Os(e as i32)),
        }
    }

    /// Reset the counter to zero. Returns the number of coalesced wakes.
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            0
        } else {
            val
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for EventFdWaker {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
