//! Shared FIFO task queue.
//!
//! One queue serves every worker: a `VecDeque` behind a mutex, plus a
//! condition variable for the blocking pop. There are no per-worker deques
//! and no stealing.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

struct QueueState<T> {
    tasks: VecDeque<T>,
    finished: bool,
}

/// Mutex/condvar FIFO with a one-way `finish` signal.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                finished: false,
            }),
            ready: Condvar::new(),
        }
    }

    // Tasks run outside the lock, so a poisoned mutex still guards a consistent deque.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue a task and wake one blocked waiter.
    pub fn push(&self, task: T) {
        self.lock().tasks.push_back(task);
        self.ready.notify_one();
    }

    /// Pop the oldest task without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().tasks.pop_front()
    }

    /// Block until a task is available or the queue is finished.
    ///
    /// Returns `None` only once the queue is finished and empty.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.lock();
        while state.tasks.is_empty() && !state.finished {
            state = match self.ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state.tasks.pop_front()
    }

    /// Release every blocked waiter. Queued tasks stay poppable.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.ready.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }
}
