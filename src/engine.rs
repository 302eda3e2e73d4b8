//! Host-facing entry points (spec.md §6), grounded on
//! `original_source/engine/voxel_engine.cpp`'s `VoxelEngine`: one process
//! holds the shared thread pool and the global viewer registry
//! (`_world.viewers`); volumes (`VoxelEngine::_worlds`/terrains in the
//! original) register against it and read the same viewer snapshot every
//! tick. Per spec.md §9's Design Notes, this passes an explicit context
//! (`VoxelEngine`) through every entry point instead of a process-wide
//! singleton — the data flow is identical, and it composes with normal
//! ownership and testing instead of `OnceLock`/`static`.
//!
//! **Open Question resolved — viewer scope:** spec.md §6 lists viewer
//! management under the same "per-volume" bullet as `add_volume`, which
//! reads ambiguously. `original_source/engine/voxel_engine.cpp` resolves
//! it: viewers live in one list on `VoxelEngine`, not per volume/terrain,
//! since a viewer is usually a camera shared across every streamed
//! volume in the scene. This port follows the original: viewers are
//! engine-global; every volume's priority evaluation and streaming pass
//! reads the same published [`crate::priority::ViewersSnapshot`].
//!
//! **Known simplification — multi-viewer streaming:** priority evaluation
//! (`priority::evaluate`) and the main-thread applier already generalize
//! to any number of registered viewers (closest-distance-of-all). The
//! fixed-LOD sliding box and octree grid driver (`streaming.rs`,
//! `octree.rs`) are, in this port, driven from a single representative
//! position per tick (the first registered viewer) rather than unioning
//! independent sliding boxes per viewer — extending those two drivers to
//! track boxes per-viewer is a real follow-up, not attempted here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::applier::MainThreadApplier;
use crate::async_edit::{AsyncEdit, AsyncEditQueue};
use crate::config::VolumeConfig;
use crate::data::SharedVoxelBuffer;
use crate::dependency::{DependencyRegistry, MeshingDependency, StreamingDependency};
use crate::error::{CoreError, CoreResult};
use crate::interfaces::{Generator, Mesher, Stream};
use crate::lodding;
use crate::math::ChunkPos;
use crate::output::VolumeCallbacks;
use crate::priority::ViewersSnapshot;
use crate::slotmap::{SlotMap, VolumeId};
use crate::tasks::pool::TaskPool;
use crate::tasks::task_trait::Task;
use crate::viewer::{Viewer, ViewerFlags, ViewerId};
use crate::volume_shared::VolumeShared;

/// A boxed piece of main-thread work spread across several `process()`
/// calls instead of run to completion in one (spec.md §6's
/// `push_main_thread_time_spread_task`). Returns `true` once finished;
/// `false` reschedules it for the next call.
pub type TimeSpreadTask = Box<dyn FnMut() -> bool + Send>;

/// Grounded on `original_source/engine/voxel_engine.cpp`'s
/// `TimeSpreadTaskRunner`: a plain FIFO of closures drained a few at a
/// time per `process()` call, bounded by the same per-tick time budget
/// as the completed-task drain.
#[derive(Default)]
struct TimeSpreadQueue {
    tasks: Mutex<VecDeque<TimeSpreadTask>>,
}

impl TimeSpreadQueue {
    fn push(&self, task: TimeSpreadTask) {
        self.tasks.lock().push_back(task);
    }

    fn run_some(&self, budget: Duration) {
        let deadline = Instant::now() + budget;
        let mut queue = self.tasks.lock();
        let rounds = queue.len();
        for _ in 0..rounds {
            if Instant::now() >= deadline {
                break;
            }
            let Some(mut task) = queue.pop_front() else {
                break;
            };
            if !task() {
                queue.push_back(task);
            }
        }
    }
}

struct VolumeEntry {
    shared: Arc<VolumeShared>,
    applier: MainThreadApplier,
    async_edits: AsyncEditQueue,
    time_spread: TimeSpreadQueue,
}

/// Host-facing engine context. Construct one per process (or per test);
/// every volume added to it shares its thread pool and its viewer
/// registry.
pub struct VoxelEngine {
    pool: Arc<TaskPool>,
    volumes: SlotMap<VolumeEntry, VolumeId>,
    viewers: SlotMap<Viewer, ViewerId>,
}

impl Default for VoxelEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelEngine {
    pub fn new() -> Self {
        Self::with_worker_threads(num_cpus::get().max(1))
    }

    pub fn with_worker_threads(num_threads: usize) -> Self {
        Self {
            pool: Arc::new(TaskPool::new(num_threads)),
            volumes: SlotMap::new(),
            viewers: SlotMap::new(),
        }
    }

    fn entry(&self, id: VolumeId) -> CoreResult<&VolumeEntry> {
        self.volumes.get(id).ok_or(CoreError::UnknownVolume(id))
    }

    // -- Volumes --------------------------------------------------------

    pub fn add_volume(
        &mut self,
        config: VolumeConfig,
        callbacks: Arc<dyn VolumeCallbacks>,
        generator: Option<Arc<dyn Generator>>,
        stream: Option<Arc<dyn Stream>>,
        mesher: Option<Arc<dyn Mesher>>,
    ) -> CoreResult<VolumeId> {
        config.validate()?;
        let deps = DependencyRegistry::new(
            StreamingDependency::new(generator, stream),
            MeshingDependency::new(mesher),
        );
        let shared = Arc::new(VolumeShared::new(config, callbacks, self.pool.clone(), deps));
        let applier = MainThreadApplier::new(&shared);
        let id = self.volumes.insert(VolumeEntry {
            shared,
            applier,
            async_edits: AsyncEditQueue::new(),
            time_spread: TimeSpreadQueue::default(),
        });
        Ok(id)
    }

    pub fn remove_volume(&mut self, id: VolumeId) -> CoreResult<()> {
        self.volumes.remove(id).ok_or(CoreError::UnknownVolume(id))?;
        Ok(())
    }

    pub fn volume_shared(&self, id: VolumeId) -> CoreResult<&Arc<VolumeShared>> {
        Ok(&self.entry(id)?.shared)
    }

    /// Replaces the volume's stream/generator pair, invalidating the
    /// previous snapshot so every task still holding it self-cancels
    /// (spec.md §3/§8 scenario 6).
    pub fn replace_streaming(
        &self,
        id: VolumeId,
        generator: Option<Arc<dyn Generator>>,
        stream: Option<Arc<dyn Stream>>,
    ) -> CoreResult<()> {
        let entry = self.entry(id)?;
        entry.shared.deps.replace_streaming(StreamingDependency::new(generator, stream));
        Ok(())
    }

    pub fn replace_mesher(&self, id: VolumeId, mesher: Option<Arc<dyn Mesher>>) -> CoreResult<()> {
        let entry = self.entry(id)?;
        entry.shared.deps.replace_meshing(MeshingDependency::new(mesher));
        Ok(())
    }

    // -- Viewers (engine-global, see module docs) ------------------------

    pub fn add_viewer(&mut self, position: glam::Vec3, view_distance: f32, flags: ViewerFlags) -> ViewerId {
        self.viewers.insert(Viewer::new(position, view_distance, flags))
    }

    pub fn remove_viewer(&mut self, id: ViewerId) -> CoreResult<()> {
        self.viewers.remove(id).ok_or(CoreError::UnknownViewer(id))?;
        Ok(())
    }

    fn viewer(&self, id: ViewerId) -> CoreResult<&Viewer> {
        self.viewers.get(id).ok_or(CoreError::UnknownViewer(id))
    }

    pub fn set_viewer_position(&self, id: ViewerId, position: glam::Vec3) -> CoreResult<()> {
        self.viewer(id)?.set_position(position);
        Ok(())
    }

    pub fn set_viewer_distance(&self, id: ViewerId, view_distance: f32) -> CoreResult<()> {
        self.viewer(id)?.set_view_distance(view_distance);
        Ok(())
    }

    pub fn set_viewer_flags(&self, id: ViewerId, flags: ViewerFlags) -> CoreResult<()> {
        self.viewer(id)?.set_flags(flags);
        Ok(())
    }

    // -- Task injection (spec.md §6) --------------------------------------

    /// Submits a host-built task onto its own lane (`Task::lane` decides
    /// I/O vs. compute). The original exposes two separate entry points
    /// that each pick a lane at the call site; this port folds that into
    /// one submission path since the lane is already part of the task's
    /// contract (spec.md §4.5).
    pub fn push_async_task(&self, volume: VolumeId, task: Box<dyn Task>) -> CoreResult<()> {
        self.entry(volume)?.shared.pool.submit(task);
        Ok(())
    }

    /// Alias for [`Self::push_async_task`] kept for parity with
    /// spec.md §6's naming; both route through the task's own `lane()`.
    pub fn push_async_io_task(&self, volume: VolumeId, task: Box<dyn Task>) -> CoreResult<()> {
        self.push_async_task(volume, task)
    }

    pub fn push_main_thread_time_spread_task(&self, volume: VolumeId, task: TimeSpreadTask) -> CoreResult<()> {
        self.entry(volume)?.time_spread.push(task);
        Ok(())
    }

    // -- Edits ------------------------------------------------------------

    /// Marks LOD0 data/mesh blocks intersecting `positions.padded(1)` as
    /// needing lodding/remeshing (spec.md §4.10 step 1). Callers already
    /// wrote the edit into the relevant `VoxelBuffer`s (under their own
    /// write locks) before calling this; it only schedules propagation.
    pub fn post_edit_area(&self, volume: VolumeId, positions: &[ChunkPos]) -> CoreResult<()> {
        lodding::post_lod0_edit(&self.entry(volume)?.shared, positions);
        Ok(())
    }

    /// Queues an async edit (spec.md §4.11): its target box is preloaded
    /// (generating any missing LOD0 chunk under a shared tracker) before
    /// `edit.apply` runs on a worker thread, after which its box is
    /// posted through the same path as [`Self::post_edit_area`].
    pub fn push_async_edit(&self, volume: VolumeId, edit: Box<dyn AsyncEdit>) -> CoreResult<()> {
        self.entry(volume)?.async_edits.push(edit);
        Ok(())
    }

    /// Direct voxel access for a resident chunk, used by editor-style
    /// callers that want to read/write a single buffer before calling
    /// [`Self::post_edit_area`]. Returns `None` if the chunk isn't
    /// resident or is an empty marker.
    pub fn data_block_voxels(&self, volume: VolumeId, position: ChunkPos, lod: u8) -> CoreResult<Option<SharedVoxelBuffer>> {
        let shared = &self.entry(volume)?.shared;
        let map = shared.data.lod(lod)?;
        Ok(map.with_block(position, |b| b.voxels.clone()).flatten())
    }

    // -- Tick --------------------------------------------------------------

    /// Call once per host tick (spec.md §6). Publishes a fresh viewer
    /// snapshot (viewers move every tick, so this is rebuilt
    /// unconditionally rather than only on add/remove), drains completed
    /// tasks, flushes queued async edits, runs time-spread work, and
    /// kicks each volume's update task.
    ///
    /// The completed-task drain runs before `flush_async_edits`: a
    /// preload tracker's completion is posted from the worker thread in
    /// `run()`, strictly before the corresponding `DataMap` insert, which
    /// only happens in `apply_result` during the drain. Flushing edits
    /// first could see a tracker report complete on a tick where that
    /// insert hasn't landed yet.
    pub fn process(&mut self) {
        let snapshot = self.build_viewer_snapshot();
        let viewer_refs: Vec<&Viewer> = self.viewers.iter().map(|(_, v)| v).collect();

        for (_, entry) in self.volumes.iter_mut() {
            entry.shared.publish_viewers(snapshot.clone());

            let budget = Duration::from_micros(entry.shared.config.main_thread_drain_budget_micros);
            entry.applier.process(&entry.shared, &viewer_refs, budget);
            crate::async_edit::flush_async_edits(&entry.shared, &entry.async_edits);
            entry.time_spread.run_some(budget);
        }
    }

    fn build_viewer_snapshot(&self) -> Arc<ViewersSnapshot> {
        let mut highest_view_distance = 0.0f32;
        let positions: Vec<glam::Vec3> = self
            .viewers
            .iter()
            .map(|(_, v)| {
                highest_view_distance = highest_view_distance.max(v.view_distance());
                v.position()
            })
            .collect();
        Arc::new(ViewersSnapshot {
            viewers: positions,
            highest_view_distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{BlockDataOutput, BlockMeshOutput};

    struct NoopCallbacks;
    impl VolumeCallbacks for NoopCallbacks {
        fn on_data_output(&self, _output: BlockDataOutput) {}
        fn on_mesh_output(&self, _output: BlockMeshOutput) {}
    }

    #[test]
    fn add_and_remove_volume() {
        let mut engine = VoxelEngine::with_worker_threads(1);
        let id = engine
            .add_volume(VolumeConfig::default(), Arc::new(NoopCallbacks), None, None, None)
            .unwrap();
        assert!(engine.volume_shared(id).is_ok());
        engine.remove_volume(id).unwrap();
        assert!(engine.volume_shared(id).is_err());
    }

    #[test]
    fn unknown_volume_id_is_an_error() {
        let engine = VoxelEngine::with_worker_threads(1);
        let bogus = crate::slotmap::VolumeId { index: 999, version: 0 };
        assert!(matches!(engine.volume_shared(bogus), Err(CoreError::UnknownVolume(_))));
    }

    #[test]
    fn add_remove_viewer_round_trips() {
        let mut engine = VoxelEngine::with_worker_threads(1);
        let id = engine.add_viewer(glam::Vec3::ZERO, 128.0, ViewerFlags::default());
        assert!(engine.set_viewer_position(id, glam::Vec3::ONE).is_ok());
        engine.remove_viewer(id).unwrap();
        assert!(engine.set_viewer_position(id, glam::Vec3::ONE).is_err());
    }

    #[test]
    fn process_drives_the_update_task_for_every_volume() {
        let mut engine = VoxelEngine::with_worker_threads(2);
        let id = engine
            .add_volume(VolumeConfig::default(), Arc::new(NoopCallbacks), None, None, None)
            .unwrap();
        engine.add_viewer(glam::Vec3::ZERO, 128.0, ViewerFlags::default());
        engine.process();
        std::thread::sleep(Duration::from_millis(50));
        engine.process();
        let shared = engine.volume_shared(id).unwrap();
        assert!(shared.pool.stats.tasks_completed.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[test]
    fn time_spread_task_resumes_across_ticks() {
        let mut engine = VoxelEngine::with_worker_threads(1);
        let id = engine
            .add_volume(VolumeConfig::default(), Arc::new(NoopCallbacks), None, None, None)
            .unwrap();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = calls.clone();
        engine
            .push_main_thread_time_spread_task(
                id,
                Box::new(move || {
                    calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    calls_clone.load(std::sync::atomic::Ordering::SeqCst) >= 2
                }),
            )
            .unwrap();
        engine.process();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        engine.process();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
