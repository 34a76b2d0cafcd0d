//! TCP server glue: listener, accept loop and shutdown.
//!
//! `run()` drives the reactor on the calling thread and accepts on a
//! `netpoll-accept` thread. Every accepted descriptor becomes a
//! `Connection`. Callers that already hold a connected descriptor can skip
//! the listener and call `register` directly.

use crate::config::ServerConfig;
use crate::connection::{ConnContext, Connection};
use crate::handler::ServerHandler;
use crate::manager::ConnectionManager;
use crate::reactor::Reactor;
use crate::sys;

use netpoll_core::codec::Codec;
use netpoll_core::error::{NetError, NetResult};
use netpoll_core::{log_error, log_info, log_warn};

use netpoll_module::BufferPool;

use nix::errno::Errno;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct TcpServer {
    listener: OwnedFd,
    local_addr: SocketAddr,
    ctx: ConnContext,
    /// Held across "check closed, then register" in the accept loop.
    accept_gate: Mutex<()>,
    closed: AtomicBool,
}

impl TcpServer {
    /// Server delivering raw input (`on_data(conn, None)`).
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> NetResult<Self> {
        Self::build(config, handler, None)
    }

    /// Server delivering decoded frames and encoding every write.
    pub fn with_codec(
        config: ServerConfig,
        handler: Arc<dyn ServerHandler>,
        codec: Arc<dyn Codec>,
    ) -> NetResult<Self> {
        Self::build(config, handler, Some(codec))
    }

    fn build(
        config: ServerConfig,
        handler: Arc<dyn ServerHandler>,
        codec: Option<Arc<dyn Codec>>,
    ) -> NetResult<Self> {
        config.validate()?;
        let reactor = Reactor::new(config.demux_kind, config.shards, config.event_capacity, config.workers)?;
        let listener = sys::listen_tcp(&config.addr, config.backlog)?;
        let local_addr = sys::local_addr(listener.as_raw_fd())?;

        let ctx = ConnContext {
            reactor: Arc::new(reactor),
            manager: Arc::new(ConnectionManager::new()),
            handler,
            codec,
            buffers: Arc::new(BufferPool::new(config.buffer_pool_capacity, config.buffer_size)),
            read_chunk: config.read_chunk,
        };
        Ok(Self {
            listener,
            local_addr,
            ctx,
            accept_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Bound address; resolves port 0 to the actual port.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.ctx.reactor
    }

    #[inline]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.ctx.manager
    }

    #[inline]
    pub fn buffers(&self) -> &Arc<BufferPool> {
        &self.ctx.buffers
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Adopt an already connected descriptor. Without `peer`, the address
    /// is looked up with `getpeername` (`None` for non-IP sockets).
    pub fn register(&self, fd: OwnedFd, peer: Option<SocketAddr>) -> NetResult<Arc<Connection>> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let peer = peer.or_else(|| sys::peer_addr(fd.as_raw_fd()));
        Connection::open(fd, peer, self.ctx.clone())
    }

    /// Accept and serve until `close`. Blocks the calling thread.
    pub fn run(&self) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        log_info!("listening on {}", self.local_addr);
        thread::scope(|s| {
            thread::Builder::new()
                .name("netpoll-accept".into())
                .spawn_scoped(s, || self.accept_loop())
                .map_err(|e| NetError::Os(e.raw_os_error().unwrap_or(0)))?;
            let result = self.ctx.reactor.run();
            // Reactor may have been closed directly; release the acceptor too
            sys::shutdown(self.listener.as_raw_fd());
            result
        })
    }

    fn accept_loop(&self) {
        let fd = self.listener.as_raw_fd();
        loop {
            match sys::accept(fd) {
                Ok((conn_fd, peer)) => {
                    let _gate = self.accept_gate.lock();
                    if self.is_closed() {
                        break;
                    }
                    if let Err(e) = self.register(conn_fd, Some(peer)) {
                        log_warn!("register {} failed: {}", peer, e);
                    }
                }
                Err(_) if self.is_closed() || self.ctx.reactor.is_closed() => break,
                Err(Errno::EINTR) | Err(Errno::ECONNABORTED) => continue,
                Err(e @ (Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)) => {
                    log_warn!("accept: {}; backing off", e);
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    log_error!("accept failed: {}", e);
                    break;
                }
            }
        }
        log_info!("accept loop stopped");
    }

    /// Stop accepting, close every connection, then close the reactor.
    /// Idempotent.
    pub fn close(&self) -> NetResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        sys::shutdown(self.listener.as_raw_fd());
        // Wait out a registration racing with shutdown
        drop(self.accept_gate.lock());
        self.ctx.manager.close_all();
        self.ctx.reactor.close()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
