//! # netpoll - Sharded epoll reactor
//!
//! Non-blocking TCP networking on a reactor: edge-triggered, one-shot
//! epoll registrations spread across shards, readiness handled on a work
//! pool, framed with a pluggable codec.
//!
//! ## Features
//!
//! - **Sharded**: descriptors routed to `fd % shards`, one event loop thread per shard
//! - **Edge-triggered + one-shot**: at most one event per connection in flight
//! - **Lossless writes**: output consumed only by what the kernel accepted
//! - **Codecs**: frames decoded after every read chunk, any chunking
//! - **Clean shutdown**: every connection closed exactly once, loops unblocked
//!
//! ## Quick Start
//!
//! ```ignore
//! use netpoll::{Connection, ServerConfig, ServerHandler, TcpServer};
//! use netpoll_module::LengthPrefixCodec;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_data(&self, conn: &Arc<Connection>, frame: Option<&[u8]>) {
//!         if let Some(frame) = frame {
//!             let _ = conn.write(frame);
//!         }
//!     }
//! }
//!
//! fn main() {
//!     let config = ServerConfig::from_env();
//!     let server = TcpServer::with_codec(config, Arc::new(Echo), Arc::new(LengthPrefixCodec::new())).unwrap();
//!     server.run().unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TcpServer                            │
//! │          listener, accept thread, ConnectionManager         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Connection::open
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Reactor                             │
//! │             fd % N → shard {demux, handler map}             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Shard 0  │      │  Shard 1  │      │  Shard N  │
//!    │  epoll    │      │  epoll    │      │  epoll    │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                       WorkPool                          │
//!    │   Connection::handle_event → read / decode / flush      │
//!    │                 → ServerHandler callbacks               │
//!    └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod handler;
pub mod manager;
pub mod reactor;
pub mod server;

mod sys;

pub use config::ServerConfig;
pub use connection::{ConnContext, Connection};
pub use handler::ServerHandler;
pub use manager::ConnectionManager;
pub use reactor::Reactor;
pub use server::TcpServer;

// Re-export core types
pub use netpoll_core::{
    Buffer, Codec, CodecError, BufferError, DemuxKind, Demultiplexer, Event, EventHandler,
    Interest, NetError, NetResult,
};
pub use netpoll_module::{BufferPool, LengthPrefixCodec};
