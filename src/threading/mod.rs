//! Worker pool and its building blocks.
//!
//! - `queue`: shared mutex/condvar FIFO with a finish signal
//! - `affinity`: core count detection and pinning
//! - `pool`: pinned persistent workers, scoped submission, spin barrier

pub mod affinity;
pub mod pool;
pub mod queue;

pub use affinity::{detected_core_count, optimal_thread_count, pin_current_thread};
pub use pool::{Scope, Task, ThreadPool};
pub use queue::TaskQueue;
