//! Registry of live connections, keyed by descriptor.
//!
//! Entries are `Weak`: the manager never keeps a connection alive. A
//! connection removes itself during teardown, after its descriptor is
//! closed, so removal checks identity rather than trusting the number.

use crate::connection::Connection;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};

#[derive(Default)]
pub struct ConnectionManager {
    conns: RwLock<HashMap<RawFd, Weak<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: &Arc<Connection>) {
        self.conns.write().insert(conn.fd(), Arc::downgrade(conn));
    }

    /// Remove `conn`'s entry, unless its descriptor number has already been
    /// taken over by a newer connection.
    pub fn remove(&self, conn: &Connection) {
        let mut conns = self.conns.write();
        let is_same = conns
            .get(&conn.fd())
            .is_some_and(|entry| std::ptr::eq(entry.as_ptr(), conn));
        if is_same {
            conns.remove(&conn.fd());
        }
    }

    pub fn get(&self, fd: RawFd) -> Option<Arc<Connection>> {
        self.conns.read().get(&fd).and_then(Weak::upgrade)
    }

    /// Close every live connection. Each close runs outside the lock since
    /// teardown removes its own entry.
    pub fn close_all(&self) {
        let live: Vec<Arc<Connection>> = self.conns.read().values().filter_map(Weak::upgrade).collect();
        for conn in live {
            conn.close();
        }
        self.conns.write().retain(|_, entry| entry.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::tests::{context, open_pair, Recorder};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn test_add_get_remove() {
        let rec = Arc::new(Recorder::default());
        let ctx = context(rec, None);
        let (a, _pa) = open_pair(&ctx);
        let (b, _pb) = open_pair(&ctx);

        assert_eq!(ctx.manager.len(), 2);
        assert!(Arc::ptr_eq(&ctx.manager.get(a.fd()).unwrap(), &a));
        assert!(ctx.manager.get(-1).is_none());

        a.close();
        assert_eq!(ctx.manager.len(), 1);
        assert!(ctx.manager.get(a.fd()).map_or(true, |c| Arc::ptr_eq(&c, &b)));
    }

    #[test]
    fn test_close_all() {
        let rec = Arc::new(Recorder::default());
        let ctx = context(rec.clone(), None);
        let pairs: Vec<_> = (0..10).map(|_| open_pair(&ctx)).collect();

        ctx.manager.close_all();
        assert!(ctx.manager.is_empty());
        assert_eq!(rec.closes.load(Ordering::SeqCst), 10);
        assert!(pairs.iter().all(|(conn, _)| conn.is_closed()));
        assert_eq!(ctx.reactor.handler_count(), 0);
    }
}
