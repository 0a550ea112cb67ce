//! Atomic completion counter with throttled reporting.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts finished work units; logs roughly every 10% at trace level.
pub struct ProgressTracker {
    completed: AtomicUsize,
    total: usize,
    step: usize,
    label: &'static str,
}

impl ProgressTracker {
    pub fn new(label: &'static str, total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
            step: total / 10 + 1,
            label,
        }
    }

    /// Record one finished unit and return the running count.
    pub fn mark_completed(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed.is_multiple_of(self.step) || completed == self.total {
            log::trace!(
                "{} progress: {}/{} ({:.1}%)",
                self.label,
                completed,
                self.total,
                100.0 * self.fraction()
            );
        }
        completed
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total
    }

    /// Completed fraction in `[0, 1]`; an empty tracker counts as done.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed() as f32 / self.total as f32).min(1.0)
    }
}
