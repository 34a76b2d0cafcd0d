//! Library defaults for `ServerConfig`.

/// Listen address
pub const ADDR: &str = "127.0.0.1:9000";

/// Demultiplexer backend name
pub const DEMUX_KIND: &str = "epoll";

/// Event-loop shards
pub const SHARDS: usize = 4;

/// Events returned per `wait`, per shard
pub const EVENT_CAPACITY: usize = 1024;

/// Work pool threads
pub const WORKERS: usize = 8;

/// Bytes read per syscall in the drain loop
pub const READ_CHUNK: usize = 16 * 1024;

/// Initial capacity of pooled connection buffers
pub const BUFFER_SIZE: usize = 4096;

/// Idle buffers kept for reuse
pub const BUFFER_POOL_CAPACITY: usize = 1024;

/// `listen(2)` backlog
pub const BACKLOG: i32 = 1024;
