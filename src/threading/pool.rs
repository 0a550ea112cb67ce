//! Persistent worker pool with core pinning.
//!
//! A fixed set of workers is spawned once and pinned to logical cores. Every
//! worker pulls from one shared [`TaskQueue`]. The submitting thread fans
//! work out with [`ThreadPool::execute`] or [`ThreadPool::scope`] and fans
//! back in with [`ThreadPool::wait_all`], a spin barrier over every task
//! submitted so far.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::{IdleStrategy, PoolConfig};
use crate::error::{Result, TlgemmError};
use crate::threading::affinity::{detected_core_count, optimal_thread_count, pin_current_thread};
use crate::threading::queue::TaskQueue;

/// A deferred zero-argument invocation, executed exactly once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: TaskQueue<Task>,
    stop: AtomicBool,
    active: AtomicUsize,
    // Submitted but not yet finished. Covers the window between a pop and
    // the active increment, which "queue empty && active == 0" would miss.
    pending: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: TaskQueue::new(),
            stop: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicUsize::new(0),
        }
    }

    fn submit(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.push(task);
    }

    fn run(&self, task: Task) {
        self.active.fetch_add(1, Ordering::SeqCst);
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            self.panicked.fetch_add(1, Ordering::SeqCst);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);
        // Last: the task's writes happen-before wait_all observing zero.
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.finish();
    }
}

fn worker_loop(shared: &Shared, idle: IdleStrategy) {
    while !shared.stop.load(Ordering::Acquire) {
        let task = match idle {
            IdleStrategy::Spin => shared.queue.try_pop(),
            IdleStrategy::Block => shared.queue.wait_and_pop(),
        };
        match task {
            Some(task) => shared.run(task),
            None if idle == IdleStrategy::Spin => thread::yield_now(),
            None => {}
        }
    }
}

/// Fixed-size pool of pinned worker threads.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    idle: IdleStrategy,
}

impl ThreadPool {
    /// Spawn `min(max_threads, cores)` workers (at least one).
    ///
    /// Worker `i` pins itself to core `i % cores` when `pin_cores` is set.
    /// A pinning failure leaves that worker unpinned.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let threads = optimal_thread_count(config.max_threads);
        let cores = detected_core_count();
        let shared = Arc::new(Shared::new());
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let idle = config.idle;
            let pin = config.pin_cores;

            let spawned = thread::Builder::new()
                .name(format!("tlgemm-worker-{}", index))
                .spawn(move || {
                    if pin {
                        let core = index % cores;
                        if pin_current_thread(core) {
                            log::debug!("worker {} pinned to core {}", index, core);
                        } else {
                            log::debug!(
                                "worker {} could not pin to core {}, running unpinned",
                                index,
                                core
                            );
                        }
                    }
                    worker_loop(&worker_shared, idle);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.halt();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(TlgemmError::Spawn(err));
                }
            }
        }

        log::info!(
            "thread pool started: {} workers ({} cores, idle={:?}, pinned={})",
            threads,
            cores,
            config.idle,
            config.pin_cores
        );

        Ok(Self {
            shared,
            workers,
            idle: config.idle,
        })
    }

    /// Submit a `'static` task.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(f));
    }

    /// Wait until every task submitted so far has finished.
    ///
    /// Spins with `yield_now`. Assumes nobody submits concurrently with the
    /// wait; calling it from inside a pool task deadlocks.
    pub fn wait_all(&self) {
        while self.shared.pending.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
    }

    /// Run `f` with a [`Scope`] whose tasks may borrow from the caller.
    ///
    /// Returns only after `wait_all`, also when `f` unwinds. If any task
    /// submitted during the scope panicked, returns
    /// [`TlgemmError::TaskPanicked`].
    pub fn scope<'env, F, T>(&self, f: F) -> Result<T>
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>) -> T,
    {
        struct WaitOnDrop<'a>(&'a ThreadPool);

        impl Drop for WaitOnDrop<'_> {
            fn drop(&mut self) {
                self.0.wait_all();
            }
        }

        let panics_before = self.shared.panicked.load(Ordering::SeqCst);
        let scope = Scope {
            pool: self,
            scope: PhantomData,
            env: PhantomData,
        };
        let result = {
            let _barrier = WaitOnDrop(self);
            f(&scope)
        };

        let count = self.shared.panicked.load(Ordering::SeqCst) - panics_before;
        if count > 0 {
            return Err(TlgemmError::TaskPanicked { count });
        }
        Ok(result)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn idle_strategy(&self) -> IdleStrategy {
        self.idle
    }

    /// Workers currently executing a task.
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet finished.
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Total tasks ever submitted.
    pub fn submitted_tasks(&self) -> u64 {
        self.shared.submitted.load(Ordering::SeqCst)
    }

    /// Total tasks that ran to completion (or panicked).
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Stop and join all workers. Queued tasks are discarded, not drained.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.halt();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        let discarded = self.shared.queue.len();
        if discarded > 0 {
            log::debug!("thread pool stopped with {} queued tasks discarded", discarded);
        }
        log::info!("thread pool stopped");
    }
}

/// Submission handle handed out by [`ThreadPool::scope`].
pub struct Scope<'scope, 'env: 'scope> {
    pool: &'scope ThreadPool,
    scope: PhantomData<&'scope mut &'scope ()>,
    env: PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Submit a task that may borrow anything outliving the scope.
    pub fn spawn<F>(&'scope self, f: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        let task: Box<dyn FnOnce() + Send + 'scope> = Box::new(f);
        // SAFETY: ThreadPool::scope does not return (or unwind past its
        // frame) before wait_all has seen this task finish, so nothing the
        // task borrows is freed while it can still run. Teardown needs
        // &mut ThreadPool and cannot overlap a live scope.
        let task: Task =
            unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'scope>, Task>(task) };
        self.pool.shared.submit(task);
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }
}
