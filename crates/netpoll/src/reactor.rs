//! # Reactor - sharded event loops feeding a work pool
//!
//! The reactor owns `S` demultiplexer shards. Descriptor `fd` always lives
//! on shard `fd mod S`, so every registration change and every readiness
//! event for it goes through the same shard.
//!
//! `run()` starts one thread per shard (`netpoll-shard-N`). Each loop:
//! 1. Blocks in `Demultiplexer::wait`
//! 2. Looks up each ready descriptor's handler under the shard's read lock
//! 3. Lets the handler `claim` the event
//! 4. Submits `(handler, event)` to the work pool (blocking rendezvous)
//!
//! A shard loop ends when its demultiplexer is closed or `wait` fails; the
//! other shards keep running.

use netpoll_core::demux::{DemuxKind, Demultiplexer};
use netpoll_core::error::{NetError, NetResult};
use netpoll_core::event::{Event, EventHandler};
use netpoll_core::{log_error, log_info, log_trace, log_warn};

use netpoll_module::{new_demultiplexer, EventTask, PanicHook, WorkPool};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// One demultiplexer plus the handlers registered on it.
struct Shard {
    demux: Box<dyn Demultiplexer>,
    handlers: RwLock<HashMap<RawFd, Arc<dyn EventHandler>>>,
}

pub struct Reactor {
    shards: Box<[Shard]>,
    pool: WorkPool<EventTask>,
    event_capacity: usize,
    /// Registrations currently live across all shards.
    active: AtomicUsize,
    closed: AtomicBool,
}

impl Reactor {
    /// Build `shards` demultiplexers of `kind` and a pool of `workers`.
    pub fn new(kind: DemuxKind, shards: usize, event_capacity: usize, workers: usize) -> NetResult<Self> {
        if shards == 0 {
            return Err(NetError::InvalidShardCount(shards));
        }
        let demuxes = (0..shards)
            .map(|_| new_demultiplexer(kind, event_capacity))
            .collect::<NetResult<Vec<_>>>()?;
        Self::with_demultiplexers(demuxes, event_capacity, workers)
    }

    /// Build from caller-supplied demultiplexers, one shard each.
    pub fn with_demultiplexers(
        demuxes: Vec<Box<dyn Demultiplexer>>,
        event_capacity: usize,
        workers: usize,
    ) -> NetResult<Self> {
        if demuxes.is_empty() {
            return Err(NetError::InvalidShardCount(0));
        }
        let shards = demuxes
            .into_iter()
            .map(|demux| Shard { demux, handlers: RwLock::new(HashMap::new()) })
            .collect();
        Ok(Self {
            shards,
            pool: WorkPool::new(workers),
            event_capacity: event_capacity.max(1),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard that owns `fd`.
    #[inline]
    pub fn shard_index(&self, fd: RawFd) -> usize {
        fd.rem_euclid(self.shards.len() as RawFd) as usize
    }

    #[inline]
    fn shard(&self, fd: RawFd) -> &Shard {
        &self.shards[self.shard_index(fd)]
    }

    /// Register `handler` for `event.fd` with `event.interest`.
    ///
    /// Re-adding a registered descriptor replaces its handler only if the
    /// demultiplexer accepts the add; otherwise the previous entry stays.
    pub fn add_handler(&self, event: Event, handler: Arc<dyn EventHandler>) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let shard = self.shard(event.fd);
        let mut handlers = shard.handlers.write();
        let previous = handlers.insert(event.fd, handler);
        match shard.demux.add(event) {
            Ok(()) => {
                if previous.is_none() {
                    self.active.fetch_add(1, Ordering::Relaxed);
                }
                log_trace!("fd {} added ({})", event.fd, event.interest);
                Ok(())
            }
            Err(e) => {
                restore(&mut handlers, event.fd, previous);
                Err(e)
            }
        }
    }

    /// Deregister `fd`. The entry is dropped even if the demultiplexer call
    /// fails, since the descriptor is going away either way.
    pub fn del_handler(&self, fd: RawFd) -> NetResult<()> {
        let shard = self.shard(fd);
        let mut handlers = shard.handlers.write();
        if handlers.remove(&fd).is_none() {
            return Err(NetError::HandlerNotFound(fd));
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
        log_trace!("fd {} deleted", fd);
        shard.demux.delete(fd)
    }

    /// Change the interest (and handler) of a registered descriptor. Also
    /// the re-arm step for one-shot registrations.
    pub fn mod_handler(&self, event: Event, handler: Arc<dyn EventHandler>) -> NetResult<()> {
        let shard = self.shard(event.fd);
        let mut handlers = shard.handlers.write();
        let Some(slot) = handlers.get_mut(&event.fd) else {
            return Err(NetError::HandlerNotFound(event.fd));
        };
        let previous = std::mem::replace(slot, handler);
        shard.demux.modify(event).map_err(|e| {
            handlers.insert(event.fd, previous);
            e
        })
    }

    /// Register a hook called when an event handler panics.
    pub fn on_panic(&self, hook: PanicHook) {
        self.pool.on_panic(hook);
    }

    /// Run every shard loop plus the work pool; returns once all shard
    /// loops have ended and the workers have exited.
    pub fn run(&self) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        self.pool.start()?;

        let spawned = thread::scope(|s| {
            for (idx, shard) in self.shards.iter().enumerate() {
                let spawned = thread::Builder::new()
                    .name(format!("netpoll-shard-{}", idx))
                    .spawn_scoped(s, move || self.shard_loop(idx, shard));
                if let Err(e) = spawned {
                    log_error!("failed to spawn shard {}: {}", idx, e);
                    // Unblock the shards already running so the scope can end
                    let _ = self.close();
                    return Err(NetError::Os(e.raw_os_error().unwrap_or(0)));
                }
            }
            Ok(())
        });

        // No shard left to feed the pool
        self.pool.close();
        self.pool.join();
        log_info!("reactor stopped");
        spawned
    }

    fn shard_loop(&self, idx: usize, shard: &Shard) {
        let mut events = Vec::with_capacity(self.event_capacity);
        log_info!("shard {} started", idx);
        loop {
            match shard.demux.wait(&mut events) {
                Ok(_) => {}
                Err(NetError::Closed) => break,
                Err(e) => {
                    log_error!("shard {} wait failed: {}", idx, e);
                    break;
                }
            }
            for event in events.iter() {
                let handler = shard.handlers.read().get(&event.fd).cloned();
                let Some(handler) = handler else {
                    log_trace!("shard {}: no handler for fd {}", idx, event.fd);
                    continue;
                };
                if !handler.claim(*event) {
                    log_trace!("shard {}: fd {} event folded into running handler", idx, event.fd);
                    continue;
                }
                if self.pool.submit(EventTask { handler, event: *event }).is_err() {
                    log_info!("shard {} stopped: work pool closed", idx);
                    return;
                }
            }
        }
        log_info!("shard {} stopped", idx);
    }

    /// Close every demultiplexer and stop the work pool. Idempotent.
    pub fn close(&self) -> NetResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut result = Ok(());
        for (idx, shard) in self.shards.iter().enumerate() {
            if let Err(e) = shard.demux.close() {
                log_warn!("shard {} close failed: {}", idx, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.pool.close();
        result
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live registrations across all shards.
    pub fn handler_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Live registrations on shard `idx`.
    pub fn shard_handler_count(&self, idx: usize) -> usize {
        self.shards.get(idx).map_or(0, |s| s.handlers.read().len())
    }
}

/// Put back the entry that an insert displaced, or drop the new one.
fn restore(
    handlers: &mut HashMap<RawFd, Arc<dyn EventHandler>>,
    fd: RawFd,
    previous: Option<Arc<dyn EventHandler>>,
) {
    match previous {
        Some(prev) => {
            handlers.insert(fd, prev);
        }
        None => {
            handlers.remove(&fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpoll_core::event::Interest;
    use parking_lot::{Condvar, Mutex};
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Add,
        Del,
        Mod,
    }

    /// Records calls, fails on request, and serves injected events.
    #[derive(Default)]
    struct FakeDemux {
        id: usize,
        calls: Arc<Mutex<Vec<(usize, Op, RawFd)>>>,
        fail: Option<(Op, RawFd)>,
        queue: Mutex<VecDeque<Event>>,
        ready: Condvar,
        closed: AtomicBool,
    }

    impl FakeDemux {
        fn record(&self, op: Op, fd: RawFd) -> NetResult<()> {
            self.calls.lock().push((self.id, op, fd));
            if self.fail == Some((op, fd)) {
                return Err(NetError::Os(libc::EBADF));
            }
            Ok(())
        }

        fn inject(&self, event: Event) {
            self.queue.lock().push_back(event);
            self.ready.notify_all();
        }
    }

    impl Demultiplexer for FakeDemux {
        fn add(&self, event: Event) -> NetResult<()> {
            self.record(Op::Add, event.fd)
        }

        fn delete(&self, fd: RawFd) -> NetResult<()> {
            self.record(Op::Del, fd)
        }

        fn modify(&self, event: Event) -> NetResult<()> {
            self.record(Op::Mod, event.fd)
        }

        fn wait(&self, events: &mut Vec<Event>) -> NetResult<usize> {
            events.clear();
            let mut queue = self.queue.lock();
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(NetError::Closed);
                }
                if !queue.is_empty() {
                    events.extend(queue.drain(..));
                    return Ok(events.len());
                }
                self.ready.wait(&mut queue);
            }
        }

        fn close(&self) -> NetResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            let _guard = self.queue.lock();
            self.ready.notify_all();
            Ok(())
        }
    }

    fn fake_reactor(
        shards: usize,
        fail: Option<(Op, RawFd)>,
    ) -> (Reactor, Arc<Mutex<Vec<(usize, Op, RawFd)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let demuxes = (0..shards)
            .map(|id| {
                Box::new(FakeDemux { id, calls: Arc::clone(&calls), fail, ..Default::default() })
                    as Box<dyn Demultiplexer>
            })
            .collect();
        (Reactor::with_demultiplexers(demuxes, 64, 2).unwrap(), calls)
    }

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(|_: Event| {})
    }

    #[test]
    fn test_zero_shards_rejected() {
        assert!(matches!(
            Reactor::new(DemuxKind::Epoll, 0, 16, 1),
            Err(NetError::InvalidShardCount(0))
        ));
        assert!(matches!(
            Reactor::with_demultiplexers(Vec::new(), 16, 1),
            Err(NetError::InvalidShardCount(0))
        ));
    }

    #[test]
    fn test_shard_routing() {
        const SHARDS: usize = 7;
        let (reactor, calls) = fake_reactor(SHARDS, None);

        for fd in 0..1000 {
            let ev = Event::new(fd, Interest::READ);
            reactor.add_handler(ev, noop()).unwrap();
            reactor.mod_handler(ev, noop()).unwrap();
            reactor.del_handler(fd).unwrap();
        }

        let calls = calls.lock();
        assert_eq!(calls.len(), 3000);
        for &(shard, _, fd) in calls.iter() {
            assert_eq!(shard, fd as usize % SHARDS, "fd {} routed to shard {}", fd, shard);
        }
        assert_eq!(reactor.handler_count(), 0);
    }

    #[test]
    fn test_del_unknown_is_not_found() {
        let (reactor, calls) = fake_reactor(2, None);
        assert_eq!(reactor.del_handler(42), Err(NetError::HandlerNotFound(42)));
        assert_eq!(
            reactor.mod_handler(Event::new(42, Interest::READ), noop()),
            Err(NetError::HandlerNotFound(42))
        );
        assert!(calls.lock().is_empty());
        assert_eq!(reactor.shard_handler_count(0), 0);
    }

    #[test]
    fn test_failed_add_leaves_no_entry() {
        let (reactor, _) = fake_reactor(2, Some((Op::Add, 9)));
        assert!(reactor.add_handler(Event::new(9, Interest::READ), noop()).is_err());
        assert_eq!(reactor.handler_count(), 0);
        assert_eq!(reactor.shard_handler_count(1), 0);
        assert_eq!(reactor.del_handler(9), Err(NetError::HandlerNotFound(9)));

        reactor.add_handler(Event::new(8, Interest::READ), noop()).unwrap();
        assert_eq!(reactor.handler_count(), 1);
        assert_eq!(reactor.shard_handler_count(0), 1);
    }

    #[test]
    fn test_failed_mod_keeps_entry() {
        let (reactor, _) = fake_reactor(1, Some((Op::Mod, 3)));
        reactor.add_handler(Event::new(3, Interest::READ), noop()).unwrap();
        assert!(reactor.mod_handler(Event::new(3, Interest::WRITE), noop()).is_err());
        assert_eq!(reactor.handler_count(), 1);
        assert_eq!(reactor.shard_handler_count(0), 1);
    }

    #[test]
    fn test_failed_del_still_drops_entry() {
        let (reactor, _) = fake_reactor(1, Some((Op::Del, 3)));
        reactor.add_handler(Event::new(3, Interest::READ), noop()).unwrap();
        assert!(reactor.del_handler(3).is_err());
        assert_eq!(reactor.handler_count(), 0);
        assert_eq!(reactor.del_handler(3), Err(NetError::HandlerNotFound(3)));
    }

    #[test]
    fn test_run_dispatches_and_close_stops() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let demuxes: Vec<Arc<FakeDemux>> = (0..2)
            .map(|id| Arc::new(FakeDemux { id, calls: Arc::clone(&calls), ..Default::default() }))
            .collect();
        let boxed = demuxes
            .iter()
            .map(|d| Box::new(SharedDemux(Arc::clone(d))) as Box<dyn Demultiplexer>)
            .collect();
        let reactor = Arc::new(Reactor::with_demultiplexers(boxed, 16, 2).unwrap());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for fd in [4, 5] {
            let seen = Arc::clone(&seen);
            reactor
                .add_handler(
                    Event::new(fd, Interest::READ),
                    Arc::new(move |ev: Event| seen.lock().push(ev.fd)),
                )
                .unwrap();
        }

        let runner = {
            let reactor = Arc::clone(&reactor);
            thread::spawn(move || reactor.run())
        };

        demuxes[0].inject(Event::new(4, Interest::READ));
        demuxes[1].inject(Event::new(5, Interest::READ));
        // No handler: skipped
        demuxes[1].inject(Event::new(7, Interest::READ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        reactor.close().unwrap();
        reactor.close().unwrap();
        assert!(runner.join().unwrap().is_ok());

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![4, 5]);
        assert!(demuxes.iter().all(|d| d.closed.load(Ordering::SeqCst)));
        assert_eq!(reactor.add_handler(Event::new(6, Interest::READ), noop()), Err(NetError::Closed));
    }

    /// Accepts only read events at claim time.
    #[derive(Default)]
    struct ReadOnlyClaims {
        claimed: Mutex<Vec<Interest>>,
        handled: Mutex<Vec<Interest>>,
    }

    impl EventHandler for ReadOnlyClaims {
        fn handle_event(&self, event: Event) {
            self.handled.lock().push(event.interest);
        }

        fn claim(&self, event: Event) -> bool {
            self.claimed.lock().push(event.interest);
            event.is_read()
        }
    }

    #[test]
    fn test_refused_claim_is_not_dispatched() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let demux = Arc::new(FakeDemux { calls, ..Default::default() });
        let boxed = vec![Box::new(SharedDemux(Arc::clone(&demux))) as Box<dyn Demultiplexer>];
        let reactor = Arc::new(Reactor::with_demultiplexers(boxed, 16, 1).unwrap());

        let handler = Arc::new(ReadOnlyClaims::default());
        reactor.add_handler(Event::new(4, Interest::READ), handler.clone()).unwrap();

        let runner = {
            let reactor = Arc::clone(&reactor);
            thread::spawn(move || reactor.run())
        };
        demux.inject(Event::new(4, Interest::WRITE));
        demux.inject(Event::new(4, Interest::READ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.handled.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        reactor.close().unwrap();
        assert!(runner.join().unwrap().is_ok());

        assert_eq!(*handler.claimed.lock(), vec![Interest::WRITE, Interest::READ]);
        assert_eq!(*handler.handled.lock(), vec![Interest::READ]);
    }

    /// Lets a test keep a handle on a demultiplexer owned by the reactor.
    struct SharedDemux(Arc<FakeDemux>);

    impl Demultiplexer for SharedDemux {
        fn add(&self, event: Event) -> NetResult<()> {
            self.0.add(event)
        }

        fn delete(&self, fd: RawFd) -> NetResult<()> {
            self.0.delete(fd)
        }

        fn modify(&self, event: Event) -> NetResult<()> {
            self.0.modify(event)
        }

        fn wait(&self, events: &mut Vec<Event>) -> NetResult<usize> {
            self.0.wait(events)
        }

        fn close(&self) -> NetResult<()> {
            self.0.close()
        }
    }
}
