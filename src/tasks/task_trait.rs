//! The `Task` contract shared by load/generate/save/mesh tasks
//! (spec.md §4.5).

use crate::priority::TaskPriority;

/// Which admission lane a task runs on: `Compute` tasks run in parallel
/// across all worker threads; `Io` tasks are serialized to at most one
/// in-flight task per volume (spec.md §4.5/§5 — "Streams are assumed
/// non-reentrant").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Compute,
    Io,
}

/// Set by `run` to hand a task off to a secondary scheduler (GPU) instead
/// of completing inline; the pool parks the task until `resume` is
/// called with the hand-off result (spec.md §4.5's GPU submit/convert
/// state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    TakenOut,
}

/// Per-SPEC_FULL §Module Notes: the original's `is_cancelled` on one task
/// class reads `if (stream_dependency->valid == false) { return false; }`,
/// which looks inverted (reporting "not cancelled" when the dependency is
/// dead). This crate always treats a dead dependency as cancelled — this
/// constant documents that the inversion was deliberately NOT carried
/// over, pinned by `dependency_invalidation_cancels_task` below.
pub const DEAD_DEPENDENCY_MEANS_CANCELLED: bool = true;

/// A unit of work the pool can schedule, run off the main thread, and
/// apply back on the main thread.
pub trait Task: Send {
    /// The work itself. May block on I/O or mesher compute. Returning
    /// `RunOutcome::TakenOut` suspends the task until a secondary runner
    /// calls back into the pool to resume it (used only by the optional
    /// GPU generate path).
    fn run(&mut self) -> RunOutcome;

    /// Recomputed periodically by the pool (~200ms) to rescue stale
    /// priorities as viewers move.
    fn priority(&self) -> TaskPriority;

    /// Checked each time the task is popped from the queue. A cancelled
    /// task skips `run` but still gets `apply_result(dropped=true)`.
    fn is_cancelled(&self) -> bool;

    /// Runs on the main thread after `run` finished or the task was
    /// cancelled.
    fn apply_result(self: Box<Self>, dropped: bool);

    fn lane(&self) -> Lane;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::StreamingDependency;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeLoadTask {
        dep: Arc<StreamingDependency>,
        applied_dropped: Arc<AtomicBool>,
    }

    impl Task for FakeLoadTask {
        fn run(&mut self) -> RunOutcome {
            RunOutcome::Finished
        }
        fn priority(&self) -> TaskPriority {
            TaskPriority::min()
        }
        fn is_cancelled(&self) -> bool {
            DEAD_DEPENDENCY_MEANS_CANCELLED && !self.dep.is_valid()
        }
        fn apply_result(self: Box<Self>, dropped: bool) {
            self.applied_dropped.store(dropped, Ordering::SeqCst);
        }
        fn lane(&self) -> Lane {
            Lane::Io
        }
    }

    #[test]
    fn dependency_invalidation_cancels_task() {
        let dep = StreamingDependency::new(None, None);
        let applied_dropped = Arc::new(AtomicBool::new(false));
        let task = FakeLoadTask {
            dep: dep.clone(),
            applied_dropped: applied_dropped.clone(),
        };
        assert!(!task.is_cancelled());
        dep.invalidate();
        assert!(task.is_cancelled());
        Box::new(task).apply_result(true);
        assert!(applied_dropped.load(Ordering::SeqCst));
    }
}
