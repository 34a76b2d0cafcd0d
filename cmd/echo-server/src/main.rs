//! netpoll Echo Server
//!
//! Length-prefixed echo on the sharded epoll reactor. Every decoded frame
//! is written straight back to its sender.
//!
//! Usage:
//!     cargo build --release -p netpoll-echo
//!     NETPOLL_ADDR=0.0.0.0:9000 NETPOLL_SHARDS=4 ./target/release/netpoll-echo
//!
//! Test with:
//!     ./target/release/netpoll-client 127.0.0.1:9000
//!
//! Configuration comes from `NETPOLL_*` environment variables; see
//! `ServerConfig::from_env`.

use netpoll::{Connection, NetError, ServerConfig, ServerHandler, TcpServer};
use netpoll_core::{log_error, log_info, log_warn};
use netpoll_module::LengthPrefixCodec;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

// ── Handler ──

#[derive(Default)]
struct Echo {
    accepts: AtomicU64,
    frames: AtomicU64,
    bytes: AtomicU64,
    closes: AtomicU64,
    errors: AtomicU64,
}

impl ServerHandler for Echo {
    fn on_connect(&self, conn: &Arc<Connection>) {
        self.accepts.fetch_add(1, Ordering::Relaxed);
        log_info!("accepted fd {} from {:?}", conn.fd(), conn.peer_addr());
    }

    fn on_data(&self, conn: &Arc<Connection>, frame: Option<&[u8]>) {
        let Some(frame) = frame else { return };
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        if let Err(e) = conn.write(frame) {
            log_warn!("echo to fd {} failed: {}", conn.fd(), e);
        }
    }

    fn on_error(&self, conn: &Arc<Connection>, err: &NetError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        log_warn!("fd {} error: {}", conn.fd(), err);
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        self.closes.fetch_add(1, Ordering::Relaxed);
        log_info!("fd {} closed", conn.fd());
    }
}

impl Echo {
    fn print(&self, server: &TcpServer, elapsed_secs: f64) {
        log_info!(
            "[{:.1}s] conns={} accepts={} frames={} bytes={} closes={} errors={}",
            elapsed_secs,
            server.manager().len(),
            self.accepts.load(Ordering::Relaxed),
            self.frames.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.closes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        );
    }
}

fn main() {
    netpoll_core::log::init();

    let config = match ServerConfig::try_from_env() {
        Ok(config) => config,
        Err(e) => {
            log_error!("bad configuration: {}", e);
            std::process::exit(2);
        }
    };
    config.print();

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }

    let echo = Arc::new(Echo::default());
    let server = match TcpServer::with_codec(config, echo.clone(), Arc::new(LengthPrefixCodec::new())) {
        Ok(server) => server,
        Err(e) => {
            log_error!("failed to start: {}", e);
            std::process::exit(1);
        }
    };
    log_info!("netpoll-echo: listening on {}", server.local_addr());

    let start = Instant::now();
    thread::scope(|s| {
        let serving = s.spawn(|| server.run());

        let mut last_print = Instant::now();
        while RUNNING.load(Ordering::Relaxed) && !serving.is_finished() {
            thread::sleep(Duration::from_millis(100));
            if last_print.elapsed() >= Duration::from_secs(5) {
                echo.print(&server, start.elapsed().as_secs_f64());
                last_print = Instant::now();
            }
        }

        log_info!("shutting down");
        if let Err(e) = server.close() {
            log_warn!("close: {}", e);
        }
        match serving.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log_error!("server stopped: {}", e),
            Err(_) => log_error!("server thread panicked"),
        }
    });

    echo.print(&server, start.elapsed().as_secs_f64());
}
