//! Concurrency primitives: worker threads, a recursive monitor and a fixed
//! worker pool draining a shared job queue.
//!
//! The pool is the only source of parallelism in the engine. Construction,
//! refinement and the optimizer's sampling sweeps hand it contiguous ranges of
//! work and wait at a join barrier before committing anything.

use crate::error::{IndexError, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A named OS thread running one routine.
///
/// `join` is idempotent: joining a worker twice is a no-op, and a panic in the
/// routine is reported by the first `join` instead of being swallowed.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a thread running `routine`. Spawn failure is a resource error.
    pub fn start<F>(name: impl Into<String>, routine: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(routine)
            .map_err(|e| IndexError::ResourceExhaustion {
                resource: "thread",
                reason: format!("cannot spawn `{name}`: {e}"),
            })?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the worker has been joined.
    pub fn is_joined(&self) -> bool {
        self.handle.is_none()
    }

    /// Blocks until the routine returns.
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|payload| IndexError::WorkerPanicked {
            worker: self.name.clone(),
            message: panic_message(&*payload),
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::warn!("{}", e);
        }
    }
}

#[derive(Debug, Default)]
struct Ownership {
    holder: Option<ThreadId>,
    depth: usize,
}

/// Recursive lock paired with a condition variable.
///
/// The owning thread may lock again; the monitor is released when the
/// outermost guard drops. [`MonitorGuard::wait`] releases every level at once
/// and restores the same depth after waking.
#[derive(Debug, Default)]
pub struct Monitor {
    ownership: Mutex<Ownership>,
    released: Condvar,
    signaled: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the monitor, blocking while another thread holds it.
    pub fn lock(&self) -> MonitorGuard<'_> {
        let me = thread::current().id();
        let mut own = self.ownership.lock();
        while let Some(holder) = own.holder {
            if holder == me {
                break;
            }
            self.released.wait(&mut own);
        }
        own.holder = Some(me);
        own.depth += 1;
        MonitorGuard {
            monitor: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the monitor only if it is free or already held by this thread.
    pub fn try_lock(&self) -> Option<MonitorGuard<'_>> {
        let me = thread::current().id();
        let mut own = self.ownership.lock();
        match own.holder {
            Some(holder) if holder != me => None,
            _ => {
                own.holder = Some(me);
                own.depth += 1;
                Some(MonitorGuard {
                    monitor: self,
                    _not_send: PhantomData,
                })
            }
        }
    }

    /// Wakes one thread blocked in [`MonitorGuard::wait`].
    pub fn signal(&self) {
        self.signaled.notify_one();
    }

    /// Wakes every thread blocked in [`MonitorGuard::wait`].
    pub fn broadcast(&self) {
        self.signaled.notify_all();
    }

    fn unlock(&self) {
        let mut own = self.ownership.lock();
        own.depth -= 1;
        if own.depth == 0 {
            own.holder = None;
            self.released.notify_one();
        }
    }
}

/// One level of ownership of a [`Monitor`]. Unlocks on drop.
#[must_use = "the monitor is released as soon as the guard is dropped"]
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    // must be released by the thread that acquired it
    _not_send: PhantomData<*const ()>,
}

impl MonitorGuard<'_> {
    /// Releases the monitor, blocks until signaled, then reacquires it.
    ///
    /// Spurious wakeups are possible; callers re-check their condition in a loop.
    pub fn wait(&mut self) {
        let m = self.monitor;
        let me = thread::current().id();
        let mut own = m.ownership.lock();
        let depth = own.depth;
        own.holder = None;
        own.depth = 0;
        m.released.notify_one();
        m.signaled.wait(&mut own);
        while own.holder.is_some() {
            m.released.wait(&mut own);
        }
        own.holder = Some(me);
        own.depth = depth;
    }
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.monitor.unlock();
    }
}

/// Shared cancellation flag checked by long-running passes.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the running pass stop at its next safe boundary.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears a previous abort request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    running: usize,
    shutdown: bool,
    panics: Vec<String>,
}

#[derive(Default)]
struct PoolShared {
    monitor: Monitor,
    // only touched while `monitor` is held
    state: Mutex<PoolState>,
}

enum Next {
    Run(Job),
    Wait,
    Exit,
}

fn worker_loop(shared: &PoolShared) {
    let mut guard = shared.monitor.lock();
    loop {
        let next = {
            let mut state = shared.state.lock();
            if let Some(job) = state.queue.pop_front() {
                state.running += 1;
                Next::Run(job)
            } else if state.shutdown {
                Next::Exit
            } else {
                Next::Wait
            }
        };
        match next {
            Next::Run(job) => {
                drop(guard);
                let outcome = panic::catch_unwind(AssertUnwindSafe(job));
                guard = shared.monitor.lock();
                {
                    let mut state = shared.state.lock();
                    state.running -= 1;
                    if let Err(payload) = outcome {
                        state.panics.push(panic_message(&*payload));
                    }
                }
                shared.monitor.broadcast();
            }
            Next::Wait => guard.wait(),
            Next::Exit => break,
        }
    }
}

/// Splits `0..len` into at most `parts` contiguous, non-empty ranges whose
/// lengths differ by at most one.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 || parts == 0 {
        return Vec::new();
    }
    let parts = parts.min(len);
    let chunk = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let end = start + chunk + usize::from(i < extra);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Fixed-size pool of [`Worker`]s pulling jobs from a monitor-guarded queue.
///
/// Not a process-wide rayon pool: each pass starts its own pool of exactly
/// `thread_count` named workers and joins all of them before it installs a
/// result, so a panicking job surfaces as that pass's error.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Starts `size` workers.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(IndexError::invalid("thread_pool_size", "must be at least 1"));
        }
        let mut pool = Self {
            shared: Arc::new(PoolShared::default()),
            workers: Vec::with_capacity(size),
        };
        for i in 0..size {
            let shared = Arc::clone(&pool.shared);
            // on failure `pool` drops here and joins the workers already started
            let worker = Worker::start(format!("onng-worker-{i}"), move || worker_loop(&shared))?;
            pool.workers.push(worker);
        }
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job for the next free worker.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _guard = self.shared.monitor.lock();
        self.shared.state.lock().queue.push_back(Box::new(job));
        // idle workers and `wait_idle` callers share the monitor
        self.shared.monitor.broadcast();
    }

    /// Blocks until the queue is empty and no job is running.
    ///
    /// Returns the first panic raised by a job since the previous call.
    pub fn wait_idle(&self) -> Result<()> {
        let mut guard = self.shared.monitor.lock();
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.queue.is_empty() && state.running == 0 {
                    let panics = std::mem::take(&mut state.panics);
                    return match panics.into_iter().next() {
                        Some(message) => Err(IndexError::WorkerPanicked {
                            worker: "pool job".to_string(),
                            message,
                        }),
                        None => Ok(()),
                    };
                }
            }
            guard.wait();
        }
    }

    /// Runs `f` over contiguous ranges of `0..len`, one range per worker, and
    /// returns the results in range order once every range has finished.
    pub fn run_partitioned<T, F>(&self, len: usize, f: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(Range<usize>) -> Result<T> + Send + Sync + 'static,
    {
        let ranges = partition(len, self.size());
        let f = Arc::new(f);
        let slots: Arc<Mutex<Vec<Option<Result<T>>>>> =
            Arc::new(Mutex::new((0..ranges.len()).map(|_| None).collect()));
        for (slot, range) in ranges.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let slots = Arc::clone(&slots);
            self.submit(move || {
                let out = f(range);
                slots.lock()[slot] = Some(out);
            });
        }
        self.wait_idle()?;
        let finished = std::mem::take(&mut *slots.lock());
        finished
            .into_iter()
            .enumerate()
            .map(|(slot, out)| {
                out.unwrap_or_else(|| {
                    Err(IndexError::WorkerPanicked {
                        worker: format!("range {slot}"),
                        message: "range finished without a result".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Stops every worker after the queue drains and joins them.
    pub fn join(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        {
            let _guard = self.shared.monitor.lock();
            self.shared.state.lock().shutdown = true;
            self.shared.monitor.broadcast();
        }
        let mut first = None;
        for worker in &mut self.workers {
            if let Err(e) = worker.join() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("worker pool shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_worker_join_is_idempotent() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let mut worker = Worker::start("once", move || r.store(true, Ordering::SeqCst)).unwrap();
        worker.join().unwrap();
        assert!(worker.is_joined());
        worker.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_worker_join_reports_panic() {
        let mut worker = Worker::start("boom", || panic!("exploded")).unwrap();
        match worker.join() {
            Err(IndexError::WorkerPanicked { worker, message }) => {
                assert_eq!(worker, "boom");
                assert!(message.contains("exploded"));
            }
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }
        // already joined: no second report
        worker.join().unwrap();
    }

    #[test]
    fn test_monitor_is_recursive() {
        let monitor = Arc::new(Monitor::new());
        let outer = monitor.lock();
        let inner = monitor.lock();
        drop(inner);

        let m = Arc::clone(&monitor);
        let acquired = Arc::new(AtomicBool::new(true));
        let a = Arc::clone(&acquired);
        let mut checker = Worker::start("checker", move || {
            a.store(m.try_lock().is_some(), Ordering::SeqCst);
        })
        .unwrap();
        checker.join().unwrap();
        assert!(!acquired.load(Ordering::SeqCst), "outer guard still held");

        drop(outer);
        let m = Arc::clone(&monitor);
        let a = Arc::clone(&acquired);
        let mut checker = Worker::start("checker", move || {
            a.store(m.try_lock().is_some(), Ordering::SeqCst);
        })
        .unwrap();
        checker.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_signal_handshake() {
        let monitor = Arc::new(Monitor::new());
        let ready = Arc::new(AtomicBool::new(false));
        let (m, r) = (Arc::clone(&monitor), Arc::clone(&ready));
        let mut waiter = Worker::start("waiter", move || {
            let _outer = m.lock();
            let mut guard = m.lock();
            while !r.load(Ordering::SeqCst) {
                guard.wait();
            }
        })
        .unwrap();

        {
            let _guard = monitor.lock();
            ready.store(true, Ordering::SeqCst);
            monitor.signal();
        }
        waiter.join().unwrap();
        // both levels released after the recursive wait
        assert!(monitor.try_lock().is_some());
    }

    #[test]
    fn test_broadcast_wakes_all_waiters() {
        let monitor = Arc::new(Monitor::new());
        let go = Arc::new(AtomicBool::new(false));
        let woke = Arc::new(AtomicUsize::new(0));
        let mut workers: Vec<Worker> = (0..3)
            .map(|i| {
                let (m, g, w) = (Arc::clone(&monitor), Arc::clone(&go), Arc::clone(&woke));
                Worker::start(format!("waiter-{i}"), move || {
                    let mut guard = m.lock();
                    while !g.load(Ordering::SeqCst) {
                        guard.wait();
                    }
                    w.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        {
            let _guard = monitor.lock();
            go.store(true, Ordering::SeqCst);
            monitor.broadcast();
        }
        for w in &mut workers {
            w.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_partition_contiguous_and_balanced() {
        let ranges = partition(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 8), vec![0..1, 1..2]);
        assert!(partition(0, 4).is_empty());
    }

    #[test]
    fn test_pool_runs_ranges_in_order() {
        let pool = WorkerPool::new(4).unwrap();
        let sums = pool
            .run_partitioned(100, |range| Ok(range.sum::<usize>()))
            .unwrap();
        assert_eq!(sums.len(), 4);
        assert_eq!(sums.iter().sum::<usize>(), (0..100).sum::<usize>());
        assert_eq!(sums[0], (0..25).sum::<usize>());
        pool.join().unwrap();
    }

    #[test]
    fn test_pool_reports_job_panic_and_keeps_working() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(|| panic!("bad job"));
        assert!(matches!(
            pool.wait_idle(),
            Err(IndexError::WorkerPanicked { .. })
        ));
        let out = pool.run_partitioned(4, |r| Ok(r.len())).unwrap();
        assert_eq!(out.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_pool_rejects_zero_workers() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(IndexError::InvalidConfiguration { field: "thread_pool_size", .. })
        ));
    }
}
