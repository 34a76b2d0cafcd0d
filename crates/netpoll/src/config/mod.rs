//! Server configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use netpoll::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .addr("0.0.0.0:7000".parse()?)
//!     .shards(2)
//!     .workers(16);
//! config.validate()?;
//! ```

pub mod defaults;

use netpoll_core::demux::DemuxKind;
use netpoll_core::env::{env_get, env_get_opt, env_get_str};
use netpoll_core::error::{NetError, NetResult};

use std::net::SocketAddr;

/// Construction parameters for `TcpServer` and its reactor.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub addr: SocketAddr,
    /// Demultiplexer backend
    pub demux_kind: DemuxKind,
    /// Number of event-loop shards (>= 1)
    pub shards: usize,
    /// Events returned per wait, per shard
    pub event_capacity: usize,
    /// Work pool threads
    pub workers: usize,
    /// Bytes read per syscall
    pub read_chunk: usize,
    /// Initial capacity of connection buffers
    pub buffer_size: usize,
    /// Idle buffers kept in the pool
    pub buffer_pool_capacity: usize,
    /// Listen backlog
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// Library defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            addr: default_addr(),
            demux_kind: DemuxKind::default(),
            shards: defaults::SHARDS,
            event_capacity: defaults::EVENT_CAPACITY,
            workers: defaults::WORKERS,
            read_chunk: defaults::READ_CHUNK,
            buffer_size: defaults::BUFFER_SIZE,
            buffer_pool_capacity: defaults::BUFFER_POOL_CAPACITY,
            backlog: defaults::BACKLOG,
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NETPOLL_ADDR` - Listen address (`ip:port`)
    /// - `NETPOLL_DEMUX` - Demultiplexer kind (`epoll`)
    /// - `NETPOLL_SHARDS` - Event-loop shards
    /// - `NETPOLL_EVENT_CAPACITY` - Events per wait, per shard
    /// - `NETPOLL_WORKERS` - Work pool threads
    /// - `NETPOLL_READ_CHUNK` - Bytes read per syscall
    /// - `NETPOLL_BUFFER_SIZE` - Initial connection buffer capacity
    /// - `NETPOLL_BUFFER_POOL_CAPACITY` - Idle buffers kept for reuse
    /// - `NETPOLL_BACKLOG` - Listen backlog
    ///
    /// Unparsable values fall back to the default; an unknown `NETPOLL_DEMUX`
    /// or a bad `NETPOLL_ADDR` is reported by `try_from_env`.
    pub fn from_env() -> Self {
        let kind: DemuxKind = env_get_str("DEMUX", defaults::DEMUX_KIND).parse().unwrap_or_default();
        let addr = env_get_opt("ADDR").unwrap_or_else(default_addr);
        Self::with_env_overrides(kind, addr)
    }

    /// Like `from_env`, but an unknown demultiplexer name or an unparsable
    /// listen address is an error.
    pub fn try_from_env() -> NetResult<Self> {
        let kind: DemuxKind = env_get_str("DEMUX", defaults::DEMUX_KIND).parse()?;
        let addr = match env_get_opt::<String>("ADDR") {
            Some(raw) => raw.trim().parse().map_err(|_| NetError::AddrParse(raw))?,
            None => default_addr(),
        };
        Ok(Self::with_env_overrides(kind, addr))
    }

    fn with_env_overrides(demux_kind: DemuxKind, addr: SocketAddr) -> Self {
        Self {
            addr,
            demux_kind,
            shards: env_get("SHARDS", defaults::SHARDS),
            event_capacity: env_get("EVENT_CAPACITY", defaults::EVENT_CAPACITY),
            workers: env_get("WORKERS", defaults::WORKERS),
            read_chunk: env_get("READ_CHUNK", defaults::READ_CHUNK),
            buffer_size: env_get("BUFFER_SIZE", defaults::BUFFER_SIZE),
            buffer_pool_capacity: env_get("BUFFER_POOL_CAPACITY", defaults::BUFFER_POOL_CAPACITY),
            backlog: env_get("BACKLOG", defaults::BACKLOG),
        }
    }

    // Builder methods

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn demux_kind(mut self, kind: DemuxKind) -> Self {
        self.demux_kind = kind;
        self
    }

    pub fn shards(mut self, n: usize) -> Self {
        self.shards = n;
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = n;
        self
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn buffer_pool_capacity(mut self, n: usize) -> Self {
        self.buffer_pool_capacity = n;
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> NetResult<()> {
        if self.shards == 0 {
            return Err(NetError::InvalidShardCount(self.shards));
        }
        if !self.demux_kind.is_supported() {
            return Err(NetError::UnsupportedDemux);
        }
        if self.event_capacity == 0 {
            return Err(NetError::InvalidConfig("event_capacity must be > 0"));
        }
        if self.workers == 0 {
            return Err(NetError::InvalidConfig("workers must be > 0"));
        }
        if self.read_chunk == 0 {
            return Err(NetError::InvalidConfig("read_chunk must be > 0"));
        }
        if self.backlog <= 0 {
            return Err(NetError::InvalidConfig("backlog must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("netpoll configuration:");
        eprintln!("  addr:                  {}", self.addr);
        eprintln!("  demux:                 {}", self.demux_kind);
        eprintln!("  shards:                {}", self.shards);
        eprintln!("  event_capacity:        {}", self.event_capacity);
        eprintln!("  workers:               {}", self.workers);
        eprintln!("  read_chunk:            {}", self.read_chunk);
        eprintln!("  buffer_size:           {}", self.buffer_size);
        eprintln!("  buffer_pool_capacity:  {}", self.buffer_pool_capacity);
        eprintln!("  backlog:               {}", self.backlog);
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Tests touching `NETPOLL_*` variables hold this; the harness runs
    /// tests in parallel within one process.
    static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_defaults_validate() {
        let config = ServerConfig::new();
        assert_eq!(config.addr.to_string(), defaults::ADDR);
        assert_eq!(config.demux_kind.as_str(), defaults::DEMUX_KIND);
        #[cfg(target_os = "linux")]
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .addr("0.0.0.0:7000".parse().unwrap())
            .shards(2)
            .workers(16)
            .read_chunk(512);

        assert_eq!(config.addr.port(), 7000);
        assert_eq!(config.shards, 2);
        assert_eq!(config.workers, 16);
        assert_eq!(config.read_chunk, 512);
    }

    #[test]
    fn test_validation() {
        let config = ServerConfig::new().shards(0);
        assert_eq!(config.validate(), Err(NetError::InvalidShardCount(0)));

        let config = ServerConfig::new().workers(0);
        assert!(matches!(config.validate(), Err(NetError::InvalidConfig(_))));

        let config = ServerConfig::new().event_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("NETPOLL_SHARDS", "3");
        std::env::set_var("NETPOLL_ADDR", "127.0.0.1:7777");
        let config = ServerConfig::from_env();
        assert_eq!(config.shards, 3);
        assert_eq!(config.addr.port(), 7777);
        std::env::remove_var("NETPOLL_SHARDS");
        std::env::remove_var("NETPOLL_ADDR");
    }

    #[test]
    fn test_unknown_demux_rejected() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("NETPOLL_DEMUX", "kqueue");
        let err = ServerConfig::try_from_env().unwrap_err();
        assert_eq!(err, NetError::UnknownDemuxKind("kqueue".into()));
        assert_eq!(ServerConfig::from_env().demux_kind, DemuxKind::Epoll);
        std::env::remove_var("NETPOLL_DEMUX");
    }

    #[test]
    fn test_bad_addr_rejected() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("NETPOLL_ADDR", "localhost:port");
        let err = ServerConfig::try_from_env().unwrap_err();
        assert_eq!(err, NetError::AddrParse("localhost:port".into()));
        assert_eq!(ServerConfig::from_env().addr, default_addr());
        std::env::remove_var("NETPOLL_ADDR");
    }
}
