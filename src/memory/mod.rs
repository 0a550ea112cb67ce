//! Memory helpers for the dispatch hot path.
//!
//! - `aligned`: cache-line aligned accumulators with a stack fallback
//! - `prefetch`: read/write prefetch hints (x86_64 and AArch64)

pub mod aligned;
pub mod prefetch;

pub use aligned::{AlignedBuf, CACHE_LINE_SIZE, STACK_FALLBACK_ROWS, with_zeroed_accumulator};
pub use prefetch::{prefetch_read, prefetch_write};
