//! Application callbacks for connection lifecycle events.

use crate::connection::Connection;

use netpoll_core::error::NetError;
use std::sync::Arc;

/// Implemented by the application; called from work pool threads.
///
/// Calls for one connection never overlap with each other, except that a
/// write made from another thread may tear the connection down and run
/// `on_close` there.
pub trait ServerHandler: Send + Sync {
    /// Connection accepted and about to be registered.
    fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// Input arrived. With a codec, `frame` is one decoded frame. Without
    /// one it is `None` and the raw bytes are pulled via `Connection::read`;
    /// whatever is left unread stays buffered for the next call.
    fn on_data(&self, conn: &Arc<Connection>, frame: Option<&[u8]>);

    /// Fatal I/O or codec error; the connection is closed right after.
    fn on_error(&self, _conn: &Arc<Connection>, _err: &NetError) {}

    /// Connection torn down. Called exactly once per connection.
    fn on_close(&self, _conn: &Arc<Connection>) {}
}
