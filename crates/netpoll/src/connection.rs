//! # Connection - per-descriptor read/write state machine
//!
//! A connection is registered edge-triggered and one-shot, so at most one
//! readiness event for it is in flight at a time. Each event runs:
//!
//! 1. Read bit: read into scratch until `EAGAIN`, decoding and delivering
//!    frames after every chunk
//! 2. Write bit: flush pending output until empty or `EAGAIN`
//! 3. Error / hangup bits: tear down
//! 4. Otherwise re-arm with `READ | ERROR`, plus `WRITE` while output is
//!    still pending
//!
//! Output is peeked, written, and only then consumed by the byte count the
//! kernel accepted, so a short or blocked write never drops bytes.
//!
//! The descriptor lives in an `RwLock<Option<OwnedFd>>`. I/O and re-arm
//! hold the read side for the duration of the syscall; teardown takes the
//! write side and removes the descriptor, so it runs exactly once and never
//! closes a descriptor under an in-progress syscall.

use crate::handler::ServerHandler;
use crate::manager::ConnectionManager;
use crate::reactor::Reactor;
use crate::sys;

use netpoll_core::buffer::Buffer;
use netpoll_core::codec::Codec;
use netpoll_core::error::{BufferError, NetError, NetResult};
use netpoll_core::event::{Event, EventHandler, Interest};
use netpoll_core::{log_debug, log_error, log_warn};

use netpoll_module::BufferPool;

use nix::errno::Errno;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Interest every armed connection carries.
const BASE_INTEREST: Interest = Interest::READ
    .union(Interest::ERROR)
    .union(Interest::EDGE)
    .union(Interest::ONESHOT);

/// Shared collaborators every connection of a server needs.
#[derive(Clone)]
pub struct ConnContext {
    pub reactor: Arc<Reactor>,
    pub manager: Arc<ConnectionManager>,
    pub handler: Arc<dyn ServerHandler>,
    pub codec: Option<Arc<dyn Codec>>,
    pub buffers: Arc<BufferPool>,
    /// Bytes read per syscall.
    pub read_chunk: usize,
}

/// Whether the connection survived an I/O step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Open,
    Closed,
}

pub struct Connection {
    fd: RawFd,
    peer: Option<SocketAddr>,
    /// `None` once torn down.
    slot: RwLock<Option<OwnedFd>>,
    read_buf: Mutex<Buffer>,
    write_buf: Mutex<Buffer>,
    /// Held for a whole read-drain pass.
    scratch: Mutex<Vec<u8>>,
    want_write: AtomicBool,
    /// Set from `claim` until the handler exits; that handler re-arms.
    in_flight: AtomicBool,
    /// Interest bits of events claimed while another was in flight.
    deferred: AtomicU32,
    registered: AtomicBool,
    /// Serializes registration changes with teardown.
    arm_lock: Mutex<()>,
    ext: Mutex<Option<Box<dyn Any + Send>>>,
    ctx: ConnContext,
    me: Weak<Connection>,
}

impl Connection {
    /// Take ownership of `fd`, announce it via `on_connect` and register it
    /// with the reactor.
    ///
    /// If registration fails the connection is torn down (so `on_close`
    /// still fires) and the error returned.
    pub fn open(fd: OwnedFd, peer: Option<SocketAddr>, ctx: ConnContext) -> NetResult<Arc<Connection>> {
        let raw = fd.as_raw_fd();
        sys::set_nonblocking(raw)?;

        let read_buf = ctx.buffers.acquire();
        let write_buf = ctx.buffers.acquire();
        let scratch = vec![0u8; ctx.read_chunk.max(1)];
        let conn = Arc::new_cyclic(|me| Connection {
            fd: raw,
            peer,
            slot: RwLock::new(Some(fd)),
            read_buf: Mutex::new(read_buf),
            write_buf: Mutex::new(write_buf),
            scratch: Mutex::new(scratch),
            want_write: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            deferred: AtomicU32::new(0),
            registered: AtomicBool::new(false),
            arm_lock: Mutex::new(()),
            ext: Mutex::new(None),
            ctx,
            me: me.clone(),
        });

        conn.ctx.manager.add(&conn);
        log_debug!("fd {} open (peer {:?})", raw, peer);
        conn.ctx.handler.on_connect(&conn);

        // A close racing from here on either finds `registered` set or
        // leaves an empty slot behind, never an orphan registration.
        let arm = conn.arm_lock.lock();
        let slot = conn.slot.read();
        if slot.is_none() {
            return Err(NetError::Closed);
        }
        let event = Event::new(raw, conn.interest());
        if let Err(e) = conn.ctx.reactor.add_handler(event, Arc::clone(&conn) as Arc<dyn EventHandler>) {
            drop(slot);
            drop(arm);
            log_warn!("fd {} registration failed: {}", raw, e);
            conn.close();
            return Err(e);
        }
        conn.registered.store(true, Ordering::Release);
        drop(slot);
        drop(arm);
        Ok(conn)
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.slot.read().is_none()
    }

    /// Unread input bytes.
    pub fn buffered(&self) -> usize {
        self.read_buf.lock().len()
    }

    /// Output bytes accepted by `write` but not yet by the kernel.
    pub fn pending_write(&self) -> usize {
        self.write_buf.lock().len()
    }

    /// Pull raw input bytes (codec-less mode). Fails with
    /// `Buffer(Eof)` when nothing is buffered.
    pub fn read(&self, dst: &mut [u8]) -> NetResult<usize> {
        Ok(self.read_buf.lock().read(dst)?)
    }

    /// Queue `data` (encoded first when a codec is set) and flush as much
    /// as the socket takes now; the rest goes out on write readiness.
    ///
    /// Returns `data.len()`. Fails with `Closed` if the connection is gone,
    /// including when this flush hits a fatal error.
    pub fn write(&self, data: &[u8]) -> NetResult<usize> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        match &self.ctx.codec {
            Some(codec) => {
                let frame = codec.encode(data)?;
                self.write_buf.lock().write(&frame);
            }
            None => {
                self.write_buf.lock().write(data);
            }
        }
        match self.flush() {
            Flow::Open => Ok(data.len()),
            Flow::Closed => Err(NetError::Closed),
        }
    }

    /// Tear the connection down. Returns `true` for the one call that did.
    ///
    /// Order: `on_close`, deregister, close the descriptor, leave the
    /// manager, return both buffers to the pool.
    pub fn close(&self) -> bool {
        let Some(fd) = self.slot.write().take() else {
            return false;
        };
        log_debug!("fd {} closing", self.fd);

        if let Some(conn) = self.me.upgrade() {
            self.ctx.handler.on_close(&conn);
        }
        {
            let _arm = self.arm_lock.lock();
            if self.registered.swap(false, Ordering::AcqRel) {
                if let Err(e) = self.ctx.reactor.del_handler(self.fd) {
                    log_debug!("fd {} deregister: {}", self.fd, e);
                }
            }
        }
        drop(fd);
        self.ctx.manager.remove(self);

        let read_buf = std::mem::take(&mut *self.read_buf.lock());
        let write_buf = std::mem::take(&mut *self.write_buf.lock());
        self.ctx.buffers.release(read_buf);
        self.ctx.buffers.release(write_buf);
        true
    }

    /// Attach an arbitrary value, replacing any previous one.
    pub fn set_ext<T: Any + Send>(&self, value: T) {
        *self.ext.lock() = Some(Box::new(value));
    }

    /// Run `f` on the attached value if it is a `T`.
    pub fn with_ext<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut ext = self.ext.lock();
        ext.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// Detach the attached value if it is a `T`.
    pub fn take_ext<T: Any + Send>(&self) -> Option<T> {
        let mut ext = self.ext.lock();
        if !ext.as_ref().is_some_and(|v| v.is::<T>()) {
            return None;
        }
        ext.take()?.downcast::<T>().ok().map(|v| *v)
    }

    fn interest(&self) -> Interest {
        if self.want_write.load(Ordering::SeqCst) {
            BASE_INTEREST | Interest::WRITE
        } else {
            BASE_INTEREST
        }
    }

    /// Run `f` with the raw descriptor while holding it open.
    fn with_fd<R>(&self, f: impl FnOnce(RawFd) -> R) -> Option<R> {
        let slot = self.slot.read();
        slot.as_ref().map(|fd| f(fd.as_raw_fd()))
    }

    /// Read until `EAGAIN`, handing every chunk to the codec/callback.
    fn drain_read(&self, conn: &Arc<Connection>) -> Flow {
        let mut scratch = self.scratch.lock();
        loop {
            let Some(res) = self.with_fd(|fd| sys::read(fd, &mut scratch[..])) else {
                return Flow::Closed;
            };
            match res {
                Ok(0) => {
                    drop(scratch);
                    log_debug!("fd {} peer closed", self.fd);
                    self.close();
                    return Flow::Closed;
                }
                Ok(n) => {
                    self.read_buf.lock().write(&scratch[..n]);
                    if self.dispatch(conn) == Flow::Closed {
                        return Flow::Closed;
                    }
                }
                Err(Errno::EAGAIN) => return Flow::Open,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    drop(scratch);
                    self.fail(NetError::Os(e as i32));
                    return Flow::Closed;
                }
            }
        }
    }

    /// Deliver buffered input: every complete frame with a codec, a single
    /// `None` notification without one.
    fn dispatch(&self, conn: &Arc<Connection>) -> Flow {
        let handler = &self.ctx.handler;
        match &self.ctx.codec {
            None => handler.on_data(conn, None),
            Some(codec) => loop {
                let decoded = codec.decode(&mut self.read_buf.lock());
                match decoded {
                    Ok(frame) => {
                        handler.on_data(conn, Some(&frame));
                        if self.is_closed() {
                            return Flow::Closed;
                        }
                    }
                    Err(e) if e.is_not_enough_data() => break,
                    Err(e) => {
                        log_error!("fd {} decode failed: {}", self.fd, e);
                        self.fail(NetError::Codec(e));
                        return Flow::Closed;
                    }
                }
            },
        }
        if self.is_closed() {
            return Flow::Closed;
        }
        self.read_buf.lock().reset();
        Flow::Open
    }

    /// Write path. Re-arms for write readiness when blocked, unless an event
    /// handler is running and will re-arm on its way out.
    fn flush(&self) -> Flow {
        match self.write_pending() {
            Ok(false) => Flow::Open,
            Ok(true) => {
                if !self.in_flight.load(Ordering::SeqCst) {
                    self.rearm();
                }
                Flow::Open
            }
            Err(e) => {
                self.fail(e);
                Flow::Closed
            }
        }
    }

    /// Write until the buffer is empty or the socket blocks. `Ok(true)`
    /// means bytes are still pending.
    fn write_pending(&self) -> NetResult<bool> {
        let mut buf = self.write_buf.lock();
        let slot = self.slot.read();
        let fd = slot.as_ref().ok_or(NetError::Closed)?.as_raw_fd();
        loop {
            if buf.is_empty() {
                buf.reset();
                self.want_write.store(false, Ordering::SeqCst);
                return Ok(false);
            }
            match sys::write(fd, buf.bytes()) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => {
                    // Consume only what the kernel took
                    let _ = buf.read_at(0, n);
                }
                Err(Errno::EAGAIN) => {
                    self.want_write.store(true, Ordering::SeqCst);
                    return Ok(true);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(NetError::Os(e as i32)),
            }
        }
    }

    /// Re-enable the one-shot registration with the current interest.
    fn rearm(&self) {
        let _arm = self.arm_lock.lock();
        if !self.registered.load(Ordering::Acquire) {
            return;
        }
        let slot = self.slot.read();
        if slot.is_none() {
            return;
        }
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        let event = Event::new(self.fd, self.interest());
        if let Err(e) = self.ctx.reactor.mod_handler(event, conn) {
            log_warn!("fd {} re-arm failed: {}", self.fd, e);
        }
    }

    /// One pass over the ready bits of an event.
    fn process(&self, conn: &Arc<Connection>, interest: Interest) -> Flow {
        if interest.intersects(Interest::READ) && self.drain_read(conn) == Flow::Closed {
            return Flow::Closed;
        }
        if interest.intersects(Interest::WRITE) && self.flush() == Flow::Closed {
            return Flow::Closed;
        }
        if interest.intersects(Interest::ERROR) {
            let errno = self.with_fd(sys::socket_error).flatten().unwrap_or(libc::EIO);
            self.fail(NetError::Os(errno));
            return Flow::Closed;
        }
        if interest.intersects(Interest::CLOSE) {
            self.close();
            return Flow::Closed;
        }
        Flow::Open
    }

    /// Report a fatal error, then tear down.
    fn fail(&self, err: NetError) {
        if self.is_closed() {
            return;
        }
        if let Some(conn) = self.me.upgrade() {
            self.ctx.handler.on_error(&conn, &err);
        }
        self.close();
    }
}

impl EventHandler for Connection {
    /// Runs one claimed event, then every event folded in meanwhile, then
    /// re-arms.
    fn handle_event(&self, event: Event) {
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        self.in_flight.store(true, Ordering::SeqCst);
        // Handled right below; drop our own copy left by `claim`
        self.deferred.fetch_and(!event.interest.bits(), Ordering::SeqCst);

        let mut interest = event.interest;
        loop {
            if self.process(&conn, interest) == Flow::Closed {
                return;
            }
            interest = Interest::from_bits(self.deferred.swap(0, Ordering::SeqCst));
            if !interest.is_empty() {
                continue;
            }
            self.in_flight.store(false, Ordering::SeqCst);
            // A claim that lost the race with the store above left its bits
            // behind; whoever takes `in_flight` back handles them
            if self.deferred.load(Ordering::SeqCst) == 0 || self.in_flight.swap(true, Ordering::SeqCst) {
                break;
            }
            interest = Interest::from_bits(self.deferred.swap(0, Ordering::SeqCst));
        }
        self.rearm();
    }

    /// At most one handler runs per connection. An event arriving while one
    /// is in flight (possible after an application-thread re-arm) is folded
    /// into it instead of dispatched.
    fn claim(&self, event: Event) -> bool {
        self.deferred.fetch_or(event.interest.bits(), Ordering::SeqCst);
        !self.in_flight.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Pull-mode reads for codec-less servers. An empty buffer reads as
/// `WouldBlock` while open and as end-of-stream once closed.
impl io::Read for &Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Connection::read(*self, buf) {
            Ok(n) => Ok(n),
            Err(NetError::Buffer(BufferError::Eof)) if self.is_closed() => Ok(0),
            Err(NetError::Buffer(_)) => Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => Err(e.into()),
        }
    }
}

impl io::Write for &Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Connection::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
