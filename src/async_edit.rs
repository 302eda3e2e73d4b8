//! Async edits (spec.md §4.11), grounded on
//! `original_source/terrain/variable_lod/voxel_lod_terrain.cpp`'s
//! `push_async_edit`: a host-supplied edit closure/functor is queued
//! against a region; any LOD0 chunk the region touches that isn't
//! resident yet is generated first under a shared
//! [`AsyncDependencyTracker`], and only once every dependency has posted
//! does the edit itself run (in parallel with unrelated work) and its
//! region get handed to [`crate::lodding::post_lod0_edit`].
//!
//! This deliberately does not reuse [`LoadingBlocks`](crate::loading_blocks::LoadingBlocks)
//! to dedupe the preload: `GenerateBlockTask::apply_result` never pairs
//! with a `LoadingBlocks::finish` call (only the plain load path does),
//! so registering preload positions there would leak them forever and
//! wedge the normal streaming pipeline for that position. Missing-ness is
//! instead read directly off the data map; a duplicate generate request
//! racing the normal streaming pass for the same position is a harmless,
//! self-resolving race (last write to the map wins, both are the same
//! generator output).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::math::{Box3i, ChunkPos};
use crate::priority::TaskPriority;
use crate::tasks::async_tracker::{AsyncDependencyTracker, SharedTracker};
use crate::tasks::task_trait::{Lane, RunOutcome, Task};
use crate::update_task::UpdateTask;
use crate::volume_shared::VolumeShared;

/// A host-defined edit run off the main thread. `affected_region` is read
/// once, up front, to compute which LOD0 chunks must be resident before
/// `apply` can run safely.
pub trait AsyncEdit: Send {
    /// World-space voxel region (LOD0) this edit reads and writes.
    fn affected_region(&self) -> Box3i;

    /// Performs the edit against `volume`'s LOD0 data map. Every chunk in
    /// `affected_region` is guaranteed resident by the time this runs.
    fn apply(self: Box<Self>, volume: &VolumeShared);
}

struct PendingEdit {
    edit: Option<Box<dyn AsyncEdit>>,
    chunks: Vec<ChunkPos>,
    tracker: Option<SharedTracker>,
}

/// Per-volume queue of edits awaiting their preload, drained once per
/// tick by [`flush_async_edits`].
#[derive(Default)]
pub struct AsyncEditQueue {
    pending: Mutex<Vec<PendingEdit>>,
}

impl AsyncEditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, edit: Box<dyn AsyncEdit>) {
        self.pending.lock().push(PendingEdit {
            edit: Some(edit),
            chunks: Vec::new(),
            tracker: None,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn lod0_chunks_in_region(region: Box3i, chunk_size: u32) -> Vec<ChunkPos> {
    let cs = glam::IVec3::splat(chunk_size as i32);
    let min = region.min.div_euclid(cs);
    let max = (region.max - glam::IVec3::ONE).div_euclid(cs);
    let mut out = Vec::new();
    for z in min.z..=max.z {
        for y in min.y..=max.y {
            for x in min.x..=max.x {
                out.push(ChunkPos::new(x, y, z));
            }
        }
    }
    out
}

/// Advances every queued edit by one step: newly-pushed edits get their
/// chunk list and (if needed) a preload tracker; edits already waiting on
/// a tracker are promoted to a real task submission once it completes.
/// Call once per tick, after the pool's completed-task drain so a
/// preload that finished this tick is already visible in the data map.
pub fn flush_async_edits(volume: &Arc<VolumeShared>, queue: &AsyncEditQueue) {
    let mut pending = queue.pending.lock();
    let mut i = 0;
    while i < pending.len() {
        let ready = {
            let entry = &mut pending[i];
            match &entry.tracker {
                None => {
                    let data_map = volume.data.lod(0).expect("lod0 always exists");
                    let region = entry
                        .edit
                        .as_ref()
                        .expect("edit present until dispatched")
                        .affected_region();
                    entry.chunks = lod0_chunks_in_region(region, volume.config.chunk_size);
                    let missing: Vec<ChunkPos> =
                        entry.chunks.iter().copied().filter(|p| !data_map.contains(*p)).collect();
                    if missing.is_empty() {
                        true
                    } else {
                        let tracker: SharedTracker = Arc::new(AsyncDependencyTracker::new(missing.len() as i64));
                        for pos in missing {
                            UpdateTask::submit_generate(volume, pos, 0, Some(tracker.clone()));
                        }
                        entry.tracker = Some(tracker);
                        false
                    }
                }
                Some(tracker) => tracker.is_complete(),
            }
        };

        if ready {
            let entry = pending.remove(i);
            let Some(edit) = entry.edit else { continue };
            volume.pool.submit(Box::new(EditRunTask {
                volume: volume.clone(),
                edit: Some(edit),
                chunks: entry.chunks,
            }));
        } else {
            i += 1;
        }
    }
}

/// Runs a ready [`AsyncEdit`] on the compute lane, then posts its region
/// through the normal LOD-propagation path on the main thread.
struct EditRunTask {
    volume: Arc<VolumeShared>,
    edit: Option<Box<dyn AsyncEdit>>,
    chunks: Vec<ChunkPos>,
}

impl Task for EditRunTask {
    fn run(&mut self) -> RunOutcome {
        if let Some(edit) = self.edit.take() {
            edit.apply(&self.volume);
        }
        RunOutcome::Finished
    }

    fn priority(&self) -> TaskPriority {
        // User-initiated edits jump the queue ahead of speculative
        // streaming work (spec.md §4.11: "runs as soon as its
        // dependencies are satisfied", not subject to distance ranking).
        TaskPriority::max()
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn apply_result(self: Box<Self>, dropped: bool) {
        if !dropped {
            crate::lodding::post_lod0_edit(&self.volume, &self.chunks);
        }
    }

    fn lane(&self) -> Lane {
        Lane::Compute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeConfig;
    use crate::data::block::DataBlock;
    use crate::dependency::{DependencyRegistry, MeshingDependency, StreamingDependency};
    use crate::output::{BlockDataOutput, BlockMeshOutput, VolumeCallbacks};
    use crate::tasks::pool::TaskPool;
    use crate::voxel::buffer::CHANNEL_SDF;
    use crate::voxel::channel::{ChannelDepth, ChannelKind};
    use crate::voxel::VoxelBuffer;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct NoopCallbacks;
    impl VolumeCallbacks for NoopCallbacks {
        fn on_data_output(&self, _output: BlockDataOutput) {}
        fn on_mesh_output(&self, _output: BlockMeshOutput) {}
    }

    fn make_volume() -> Arc<VolumeShared> {
        let registry = DependencyRegistry::new(StreamingDependency::new(None, None), MeshingDependency::new(None));
        Arc::new(VolumeShared::new(
            VolumeConfig::default(),
            Arc::new(NoopCallbacks),
            Arc::new(TaskPool::new(2)),
            registry,
        ))
    }

    fn make_buffer() -> VoxelBuffer {
        let mut buf = VoxelBuffer::create(glam::UVec3::splat(16)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0).unwrap();
        buf
    }

    struct FillEdit {
        region: Box3i,
        ran: Arc<AtomicBool>,
    }

    impl AsyncEdit for FillEdit {
        fn affected_region(&self) -> Box3i {
            self.region
        }
        fn apply(self: Box<Self>, volume: &VolumeShared) {
            self.ran.store(true, Ordering::SeqCst);
            let _ = volume.data.lod(0).unwrap().with_block_mut(ChunkPos::ZERO, |b| b.mark_edited());
        }
    }

    #[test]
    fn edit_over_resident_chunk_runs_without_a_preload() {
        let volume = make_volume();
        volume.data.lod(0).unwrap().insert(ChunkPos::ZERO, DataBlock::with_buffer(make_buffer(), 0));
        let queue = AsyncEditQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        queue.push(Box::new(FillEdit {
            region: Box3i::new(glam::IVec3::splat(1), glam::IVec3::splat(2)),
            ran: ran.clone(),
        }));

        flush_async_edits(&volume, &queue);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !ran.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn edit_over_missing_chunk_preloads_before_running() {
        let volume = make_volume();
        let queue = AsyncEditQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        queue.push(Box::new(FillEdit {
            region: Box3i::new(glam::IVec3::splat(1), glam::IVec3::splat(2)),
            ran: ran.clone(),
        }));

        flush_async_edits(&volume, &queue);
        assert_eq!(queue.pending_count(), 1, "edit should be waiting on its preload");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            volume.pool.drain_completed(Duration::from_millis(50));
            flush_async_edits(&volume, &queue);
            if ran.load(Ordering::SeqCst) || std::time::Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(volume.data.lod(0).unwrap().contains(ChunkPos::ZERO));
    }
}
