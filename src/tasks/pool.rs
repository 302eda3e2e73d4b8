//! Two-lane priority thread pool (spec.md §4.5/§5).
//!
//! Grounded on the teacher's `thread_pool/thread_pool.rs`
//! (`ThreadPoolManager`: a `rayon`-backed shared pool sized from
//! `num_cpus::get()`, a stats struct behind a `RwLock`, a fixed worker
//! stack size) generalized from the teacher's category-keyed pool map
//! down to the spec's exact two lanes: a parallel compute lane backed by
//! `rayon`, and a single-worker serialized I/O lane (streams are assumed
//! non-reentrant per volume). Completed tasks are posted to a
//! `crossbeam-channel` the main thread drains within a time budget,
//! matching the teacher's channel-based completion pattern in
//! `world/concurrent_chunk_manager.rs`.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::constants::tasks::{DEFAULT_REPRIORITIZE_INTERVAL_MS, DEFAULT_WORKER_STACK_SIZE_BYTES};

use super::task_trait::{Lane, RunOutcome, Task};

#[derive(Default)]
pub struct PoolStats {
    pub load_tasks_in_flight: AtomicU64,
    pub generate_tasks_in_flight: AtomicU64,
    pub save_tasks_in_flight: AtomicU64,
    /// Tracked independently of `generate_tasks_in_flight` — the original
    /// aliases the generator counter here, which SPEC_FULL calls out as a
    /// bug (spec.md §9) and this crate deliberately does not reproduce.
    pub mesh_tasks_in_flight: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_dropped: AtomicU64,
}

struct QueueEntry {
    task: Box<dyn Task>,
    sequence: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority() == other.task.priority() && self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; within equal priority, earlier sequence
        // (FIFO) wins, so we invert the sequence comparison since
        // `BinaryHeap` is a max-heap.
        self.task
            .priority()
            .cmp(&other.task.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct CompletedEntry {
    task: Box<dyn Task>,
    dropped: bool,
}

/// The two-lane task pool for one process. A single pool is typically
/// shared across all volumes, the same way the teacher's
/// `ThreadPoolManager` is a process-wide singleton accessed through
/// `get_pool`/`execute`.
pub struct TaskPool {
    compute: Arc<rayon::ThreadPool>,
    compute_queue: Mutex<BinaryHeap<QueueEntry>>,
    io_queue: Mutex<BinaryHeap<QueueEntry>>,
    io_busy: Mutex<bool>,
    sequence: AtomicU64,
    completion_tx: Sender<CompletedEntry>,
    completion_rx: Receiver<CompletedEntry>,
    pub stats: Arc<PoolStats>,
    last_reprioritize: Mutex<Instant>,
}

impl TaskPool {
    pub fn new(num_threads: usize) -> Self {
        let compute = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .stack_size(DEFAULT_WORKER_STACK_SIZE_BYTES)
            .thread_name(|i| format!("voxel-compute-{i}"))
            .build()
            .expect("failed to build compute thread pool");
        let (completion_tx, completion_rx) = unbounded();
        Self {
            compute: Arc::new(compute),
            compute_queue: Mutex::new(BinaryHeap::new()),
            io_queue: Mutex::new(BinaryHeap::new()),
            io_busy: Mutex::new(false),
            sequence: AtomicU64::new(0),
            completion_tx,
            completion_rx,
            stats: Arc::new(PoolStats::default()),
            last_reprioritize: Mutex::new(Instant::now()),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn submit(&self, task: Box<dyn Task>) {
        let entry = QueueEntry {
            sequence: self.next_sequence(),
            task,
        };
        match entry.task.lane() {
            Lane::Compute => self.compute_queue.lock().push(entry),
            Lane::Io => self.io_queue.lock().push(entry),
        }
        self.drain_queues();
    }

    /// Pops eligible tasks off both lanes and dispatches them: all
    /// eligible compute tasks run in parallel; at most one I/O task runs
    /// at a time.
    fn drain_queues(&self) {
        loop {
            let next = {
                let mut q = self.compute_queue.lock();
                pop_eligible(&mut q)
            };
            match next {
                Some(entry) => self.dispatch(entry),
                None => break,
            }
        }

        let mut busy = self.io_busy.lock();
        if !*busy {
            let next = {
                let mut q = self.io_queue.lock();
                pop_eligible(&mut q)
            };
            if let Some(entry) = next {
                *busy = true;
                self.dispatch(entry);
            }
        }
    }

    fn dispatch(&self, entry: QueueEntry) {
        let QueueEntry { mut task, .. } = entry;
        let lane = task.lane();
        let tx = self.completion_tx.clone();
        let io_busy = if lane == Lane::Io { Some(()) } else { None };
        let run = move || {
            let outcome = task.run();
            let dropped = matches!(outcome, RunOutcome::TakenOut);
            if !dropped {
                let _ = tx.send(CompletedEntry { task, dropped: false });
            }
            // `TAKEN_OUT` tasks are re-queued by the secondary runner via
            // `resume_taken_out`; they are not completed here.
        };
        match lane {
            Lane::Compute => self.compute.spawn(run),
            Lane::Io => {
                // The I/O lane runs on a dedicated thread, serialized:
                // only one `dispatch` is in flight at a time because
                // `drain_queues` only pops a new I/O task once `io_busy`
                // clears in `drain_main_thread`.
                let _ = io_busy;
                std::thread::spawn(run);
            }
        }
    }

    /// Called by whoever frees the I/O lane (normally the main-thread
    /// applier, once it has drained the completion for the task that was
    /// occupying it) to let the next I/O task start.
    pub fn release_io_lane(&self) {
        *self.io_busy.lock() = false;
        self.drain_queues();
    }

    /// Drains completed tasks and runs their `apply_result`, up to
    /// `budget`. Returns the number of tasks applied.
    ///
    /// Completions from the I/O lane release it as they are applied, so
    /// callers never need to call `release_io_lane` themselves — doing it
    /// here, rather than leaving it to the main-thread applier, keeps the
    /// "at most one I/O task in flight" invariant (spec.md §5) from
    /// depending on every caller remembering which lane a drained task
    /// happened to come from.
    pub fn drain_completed(&self, budget: Duration) -> usize {
        let deadline = Instant::now() + budget;
        let mut applied = 0;
        while Instant::now() < deadline {
            match self.completion_rx.try_recv() {
                Ok(CompletedEntry { task, dropped }) => {
                    let lane = task.lane();
                    let is_cancelled = task.is_cancelled();
                    let final_dropped = dropped || is_cancelled;
                    if final_dropped {
                        self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    task.apply_result(final_dropped);
                    applied += 1;
                    if lane == Lane::Io {
                        self.release_io_lane();
                    }
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Re-walks both pending queues, refreshing stale priorities. The pool
    /// calls this roughly every `DEFAULT_REPRIORITIZE_INTERVAL_MS`; tasks
    /// themselves don't need to do anything since `QueueEntry::cmp` reads
    /// `task.priority()` fresh each comparison — this just forces the
    /// heap to re-settle.
    pub fn maybe_reprioritize(&self) {
        let mut last = self.last_reprioritize.lock();
        if last.elapsed() < Duration::from_millis(DEFAULT_REPRIORITIZE_INTERVAL_MS) {
            return;
        }
        *last = Instant::now();
        let mut compute = self.compute_queue.lock();
        let drained: Vec<_> = compute.drain().collect();
        *compute = BinaryHeap::from(drained);
        let mut io = self.io_queue.lock();
        let drained: Vec<_> = io.drain().collect();
        *io = BinaryHeap::from(drained);
    }

    pub fn pending_compute_count(&self) -> usize {
        self.compute_queue.lock().len()
    }

    pub fn pending_io_count(&self) -> usize {
        self.io_queue.lock().len()
    }
}

fn pop_eligible(queue: &mut BinaryHeap<QueueEntry>) -> Option<QueueEntry> {
    // Cancelled tasks still need `apply_result(dropped=true)`, so even a
    // cancelled entry is popped and dispatched; `run` is skipped inside
    // `dispatch` via `is_cancelled` — handled by `drain_completed`
    // instead, since cancellation can race arrival after `run` begins.
    queue.pop()
}
