//! `AsyncDependencyTracker` (spec.md §4.11), grounded directly on
//! `original_source/util/tasks/async_dependency_tracker.h`: an atomic
//! countdown that runs a completion callback once every dependency it was
//! told to wait for has posted, or destroys pending work without running
//! it if aborted first.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::task_trait::Task;

pub struct AsyncDependencyTracker {
    count: AtomicI64,
    aborted: AtomicBool,
    tasks_have_started: AtomicBool,
    next_tasks: Mutex<Vec<Box<dyn Task>>>,
}

impl Default for AsyncDependencyTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

impl AsyncDependencyTracker {
    pub fn new(count: i64) -> Self {
        Self {
            count: AtomicI64::new(count),
            aborted: AtomicBool::new(false),
            tasks_have_started: AtomicBool::new(false),
            next_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_count(&self, count: i64) {
        self.count.store(count, Ordering::SeqCst);
    }

    /// Called once per completed dependency. Returns `true` if this call
    /// brought the count to zero (the tracker is now complete).
    pub fn post_complete(&self) -> bool {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        prev == 1
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.next_tasks.lock().clear();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.count.load(Ordering::SeqCst) <= 0
    }

    pub fn remaining_count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn set_next_tasks(&self, tasks: Vec<Box<dyn Task>>) {
        self.tasks_have_started.store(false, Ordering::SeqCst);
        *self.next_tasks.lock() = tasks;
    }

    pub fn has_next_tasks(&self) -> bool {
        !self.next_tasks.lock().is_empty()
    }

    /// Takes the queued follow-up tasks if the tracker completed normally
    /// (not aborted); marks them started so a second call returns empty.
    pub fn take_next_tasks(&self) -> Vec<Box<dyn Task>> {
        if self.is_aborted() || self.tasks_have_started.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        std::mem::take(&mut *self.next_tasks.lock())
    }
}

pub type SharedTracker = Arc<AsyncDependencyTracker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_when_count_reaches_zero() {
        let tracker = AsyncDependencyTracker::new(2);
        assert!(!tracker.is_complete());
        assert!(!tracker.post_complete());
        assert!(tracker.post_complete());
        assert!(tracker.is_complete());
    }

    #[test]
    fn aborted_tracker_destroys_pending_tasks() {
        let tracker = AsyncDependencyTracker::new(1);
        struct Noop;
        impl Task for Noop {
            fn run(&mut self) -> super::super::task_trait::RunOutcome {
                super::super::task_trait::RunOutcome::Finished
            }
            fn priority(&self) -> crate::priority::TaskPriority {
                crate::priority::TaskPriority::min()
            }
            fn is_cancelled(&self) -> bool {
                false
            }
            fn apply_result(self: Box<Self>, _dropped: bool) {}
            fn lane(&self) -> super::super::task_trait::Lane {
                super::super::task_trait::Lane::Compute
            }
        }
        tracker.set_next_tasks(vec![Box::new(Noop)]);
        assert!(tracker.has_next_tasks());
        tracker.abort();
        assert!(!tracker.has_next_tasks());
        assert!(tracker.take_next_tasks().is_empty());
    }
}
