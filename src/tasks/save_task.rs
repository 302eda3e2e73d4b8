//! `SaveBlockDataTask` (spec.md §4.5.c), grounded directly on
//! `original_source/engine/save_block_data_task.cpp`: two constructors
//! (one for voxels, one for instance data), a synchronous copy-under-
//! read-lock then a synchronous stream call, never cancelled, and a
//! `TYPE_SAVED` result posted unconditionally from `apply_result` (the
//! original's `dropped = !_has_run` becomes `dropped = !has_run` here).

use std::sync::Arc;

use crate::data::block::SharedVoxelBuffer;
use crate::dependency::StreamingDependency;
use crate::interfaces::BlockQuery;
use crate::math::ChunkPos;
use crate::output::{BlockDataOutput, BlockDataType};
use crate::priority::{band2_class, TaskPriority};
use crate::tasks::async_tracker::SharedTracker;
use crate::volume_shared::VolumeShared;
use crate::voxel::VoxelBuffer;

use super::task_trait::{Lane, RunOutcome, Task};

enum Payload {
    Voxels(SharedVoxelBuffer),
    /// Already-copied voxels, used when a caller (e.g. `GenerateBlockTask`'s
    /// cache-save path) hands over an owned buffer rather than a shared one.
    OwnedVoxels(VoxelBuffer),
}

pub struct SaveBlockDataTask {
    volume: Arc<VolumeShared>,
    position: ChunkPos,
    lod: u8,
    payload: Payload,
    stream_dep: Arc<StreamingDependency>,
    tracker: Option<SharedTracker>,
    has_run: bool,
}

impl SaveBlockDataTask {
    pub fn for_shared_voxels(
        volume: Arc<VolumeShared>,
        position: ChunkPos,
        lod: u8,
        voxels: SharedVoxelBuffer,
        stream_dep: Arc<StreamingDependency>,
        tracker: Option<SharedTracker>,
    ) -> Self {
        Self {
            volume,
            position,
            lod,
            payload: Payload::Voxels(voxels),
            stream_dep,
            tracker,
            has_run: false,
        }
    }

    pub fn for_voxels(
        volume: Arc<VolumeShared>,
        position: ChunkPos,
        lod: u8,
        voxels: VoxelBuffer,
        stream_dep: Arc<StreamingDependency>,
        tracker: Option<SharedTracker>,
    ) -> Self {
        Self {
            volume,
            position,
            lod,
            payload: Payload::OwnedVoxels(voxels),
            stream_dep,
            tracker,
            has_run: false,
        }
    }
}

impl Task for SaveBlockDataTask {
    fn run(&mut self) -> RunOutcome {
        let Some(stream) = self.stream_dep.stream.clone() else {
            log::error!(
                "save task for {:?} lod {} triggered without a stream",
                self.position,
                self.lod
            );
            if let Some(tracker) = &self.tracker {
                tracker.abort();
            }
            return RunOutcome::Finished;
        };

        let copy = match &self.payload {
            Payload::Voxels(shared) => shared.read().clone(),
            Payload::OwnedVoxels(owned) => owned.clone(),
        };

        let query = BlockQuery {
            position: self.position,
            lod: self.lod,
            block_size: self.volume.config.chunk_size,
        };
        if let Err(e) = stream.save_voxel_block(&query, &copy) {
            log::error!("save failed for {:?} lod {}: {e}", self.position, self.lod);
        }

        if let Some(tracker) = &self.tracker {
            if tracker.post_complete() {
                // Last dependent done; nothing further to flush here since
                // the reference `Stream` trait has no explicit flush hook —
                // concrete streams (e.g. the region-file backend) flush on
                // their own save path.
            }
        }

        self.has_run = true;
        RunOutcome::Finished
    }

    fn priority(&self) -> TaskPriority {
        TaskPriority::from_bands(0, 0, band2_class::SAVE, 0)
    }

    fn is_cancelled(&self) -> bool {
        // Save tasks are never cancelled (spec.md §4.5.c).
        false
    }

    fn apply_result(self: Box<Self>, dropped: bool) {
        if !self.stream_dep.is_valid() {
            return;
        }
        self.volume.callbacks.on_data_output(BlockDataOutput {
            kind: BlockDataType::Saved,
            position: self.position,
            lod: self.lod,
            voxels: None,
            dropped: dropped || !self.has_run,
            max_lod_hint: None,
            initial_load: false,
            had_voxels: false,
            had_instances: false,
        });
    }

    fn lane(&self) -> Lane {
        Lane::Io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeConfig;
    use crate::dependency::{DependencyRegistry, MeshingDependency};
    use crate::interfaces::{BlockQuery as Q, Stream, StreamError};
    use crate::output::{BlockDataOutput as Out, BlockMeshOutput, VolumeCallbacks};
    use crate::tasks::pool::TaskPool;
    use crate::voxel::buffer::CHANNEL_SDF;
    use crate::voxel::channel::{ChannelDepth, ChannelKind};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingStream {
        saved: Mutex<Vec<ChunkPos>>,
    }
    impl Stream for RecordingStream {
        fn load_voxel_block(&self, _query: &Q) -> Result<VoxelBuffer, StreamError> {
            Err(StreamError::NotFound)
        }
        fn save_voxel_block(&self, query: &Q, _buffer: &VoxelBuffer) -> Result<(), StreamError> {
            self.saved.lock().push(query.position);
            Ok(())
        }
    }

    struct CountingCallbacks {
        saved: AtomicUsize,
    }
    impl VolumeCallbacks for CountingCallbacks {
        fn on_data_output(&self, output: Out) {
            if output.kind == BlockDataType::Saved {
                self.saved.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn on_mesh_output(&self, _output: BlockMeshOutput) {}
    }

    fn make_volume(stream: Arc<dyn Stream>, callbacks: Arc<CountingCallbacks>) -> Arc<VolumeShared> {
        let dep = StreamingDependency::new(None, Some(stream));
        let registry = DependencyRegistry::new(dep, MeshingDependency::new(None));
        Arc::new(VolumeShared::new(
            VolumeConfig::default(),
            callbacks,
            Arc::new(TaskPool::new(1)),
            registry,
        ))
    }

    fn sample_buffer() -> VoxelBuffer {
        let mut buf = VoxelBuffer::create(glam::UVec3::splat(16)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
            .unwrap();
        buf
    }

    #[test]
    fn save_task_calls_stream_and_posts_saved() {
        let stream = Arc::new(RecordingStream { saved: Mutex::new(Vec::new()) });
        let callbacks = Arc::new(CountingCallbacks { saved: AtomicUsize::new(0) });
        let volume = make_volume(stream.clone(), callbacks.clone());
        let dep = volume.deps.streaming();
        let pos = ChunkPos::new(1, 2, 3);
        let mut task = SaveBlockDataTask::for_voxels(volume, pos, 0, sample_buffer(), dep, None);
        assert!(!task.is_cancelled());
        task.run();
        assert_eq!(stream.saved.lock().as_slice(), &[pos]);
        Box::new(task).apply_result(false);
        assert_eq!(callbacks.saved.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn save_task_is_never_cancelled() {
        let stream = Arc::new(RecordingStream { saved: Mutex::new(Vec::new()) });
        let callbacks = Arc::new(CountingCallbacks { saved: AtomicUsize::new(0) });
        let volume = make_volume(stream, callbacks);
        let dep = volume.deps.streaming();
        dep.invalidate();
        let task = SaveBlockDataTask::for_voxels(volume, ChunkPos::ZERO, 0, sample_buffer(), dep, None);
        assert!(!task.is_cancelled());
    }
}
