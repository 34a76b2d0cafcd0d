//! `WorkPool` - fixed set of worker threads behind a rendezvous channel.
//!
//! `submit` blocks until a worker takes the task. A congested pool therefore
//! stalls the shard loop feeding it, and the backlog stays in kernel socket
//! buffers instead of an in-process queue.
//!
//! Tasks run under `catch_unwind`. A panicking task is reported to the
//! optional hook and the worker moves on to the next task.

use netpoll_core::error::{NetError, NetResult};
use netpoll_core::event::{Event, EventHandler};
use netpoll_core::{log_debug, log_error};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Unit of work executed on a pool thread.
pub trait Task: Send + 'static {
    fn run(self);
}

/// A ready event paired with the handler registered for its descriptor.
pub struct EventTask {
    pub handler: Arc<dyn EventHandler>,
    pub event: Event,
}

impl Task for EventTask {
    #[inline]
    fn run(self) {
        self.handler.handle_event(self.event);
    }
}

/// Boxed closure task for general-purpose use.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

impl Task for Job {
    #[inline]
    fn run(self) {
        (self)()
    }
}

/// Called with the panic message of a faulting task.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;

struct PoolInner<T> {
    tasks_tx: Sender<T>,
    tasks_rx: Receiver<T>,
    /// Dropped on close; disconnection is the stop signal.
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    hook: RwLock<Option<PanicHook>>,
    size: usize,
    closed: AtomicBool,
    completed: AtomicU64,
    panicked: AtomicU64,
}

pub struct WorkPool<T: Task> {
    inner: Arc<PoolInner<T>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    started: AtomicBool,
}

impl<T: Task> WorkPool<T> {
    /// Create a pool of `size` workers (at least one). Threads are spawned
    /// by `start`.
    pub fn new(size: usize) -> Self {
        let (tasks_tx, tasks_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded(0);
        let inner = Arc::new(PoolInner {
            tasks_tx,
            tasks_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            hook: RwLock::new(None),
            size: size.max(1),
            closed: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });
        WorkPool {
            inner,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register the panic hook. Replaces any previous hook.
    pub fn on_panic(&self, hook: PanicHook) {
        *self.inner.hook.write() = Some(hook);
    }

    /// Spawn the worker threads. Later calls are no-ops.
    pub fn start(&self) -> NetResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut handles = self.handles.lock();
        for worker_id in 0..self.inner.size {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("netpoll-worker-{}", worker_id))
                .spawn(move || worker_loop(inner))
                .map_err(|e| NetError::Os(e.raw_os_error().unwrap_or(0)))?;
            handles.push(handle);
        }
        log_debug!("work pool started ({} workers)", self.inner.size);
        Ok(())
    }

    /// Hand `task` to a worker, blocking until one accepts it.
    ///
    /// Fails with `PoolClosed` once `close` has run, including for callers
    /// already blocked here.
    pub fn submit(&self, task: T) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::PoolClosed);
        }
        select! {
            send(self.inner.tasks_tx, task) -> res => res.map_err(|_| NetError::PoolClosed),
            recv(self.inner.stop_rx) -> _ => Err(NetError::PoolClosed),
        }
    }

    /// Stop accepting tasks and signal workers to exit. A worker mid-task
    /// finishes it first. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.stop_tx.lock().take();
        log_debug!("work pool closed");
    }

    /// Wait for every worker thread to exit.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Tasks that ran to completion without panicking.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.inner.panicked.load(Ordering::Relaxed)
    }
}

impl<T: Task> Drop for WorkPool<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop<T: Task>(inner: Arc<PoolInner<T>>) {
    loop {
        select! {
            recv(inner.tasks_rx) -> msg => match msg {
                Ok(task) => run_task(&inner, task),
                Err(_) => break,
            },
            recv(inner.stop_rx) -> _ => break,
        }
    }
}

fn run_task<T: Task>(inner: &PoolInner<T>, task: T) {
    match catch_unwind(AssertUnwindSafe(move || task.run())) {
        Ok(()) => {
            inner.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(payload) => {
            inner.panicked.fetch_add(1, Ordering::Relaxed);
            let msg = panic_message(payload.as_ref());
            log_error!("task panicked: {}", msg);
            let hook = inner.hook.read().clone();
            if let Some(hook) = hook {
                hook(&msg);
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpoll_core::event::Interest;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_runs_every_submitted_task() {
        let pool: WorkPool<Job> = WorkPool::new(4);
        pool.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.close();
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.completed(), 100);
    }

    #[test]
    fn test_panic_reported_and_worker_survives() {
        let pool: WorkPool<Job> = WorkPool::new(1);
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let seen = Arc::clone(&seen);
            pool.on_panic(Arc::new(move |msg: &str| seen.lock().push(msg.to_string())));
        }
        pool.start().unwrap();

        pool.submit(Box::new(|| panic!("handler blew up"))).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            pool.submit(Box::new(move || ran.store(true, Ordering::SeqCst))).unwrap();
        }

        pool.close();
        pool.join();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(pool.panicked(), 1);
        assert_eq!(seen.lock().as_slice(), ["handler blew up".to_string()]);
    }

    #[test]
    fn test_close_unblocks_pending_submit() {
        // No workers: submit can only finish through close
        let pool: Arc<WorkPool<Job>> = Arc::new(WorkPool::new(1));
        let submitter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.submit(Box::new(|| {})))
        };

        thread::sleep(Duration::from_millis(50));
        pool.close();
        assert_eq!(submitter.join().unwrap(), Err(NetError::PoolClosed));
        assert_eq!(pool.submit(Box::new(|| {})), Err(NetError::PoolClosed));
    }

    #[test]
    fn test_event_task_dispatch() {
        let pool: WorkPool<EventTask> = WorkPool::new(2);
        pool.start().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn EventHandler> = {
            let fired = Arc::clone(&fired);
            Arc::new(move |ev: Event| {
                assert_eq!(ev.fd, 9);
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        for _ in 0..3 {
            pool.submit(EventTask { handler: Arc::clone(&handler), event: Event::new(9, Interest::READ) })
                .unwrap();
        }

        pool.close();
        pool.join();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
