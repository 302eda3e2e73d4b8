//! `GenerateBlockTask` (spec.md §4.5.b).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::UVec3;
use parking_lot::Mutex;

use crate::data::block::DataBlock;
use crate::dependency::StreamingDependency;
use crate::math::ChunkPos;
use crate::output::{BlockDataOutput, BlockDataType};
use crate::priority::{band2_class, PriorityCell, TaskPriority};
use crate::tasks::async_tracker::SharedTracker;
use crate::volume_shared::VolumeShared;
use crate::voxel::buffer::CHANNEL_SDF;
use crate::voxel::channel::{ChannelDepth, ChannelKind};
use crate::voxel::VoxelBuffer;

use super::save_task::SaveBlockDataTask;
use super::task_trait::{Lane, RunOutcome, Task, DEAD_DEPENDENCY_MEANS_CANCELLED};

/// Stage of the optional GPU submit/convert state machine. Purely-CPU
/// generators finish in one `run` call and never leave `CpuOrSubmit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CpuOrSubmit,
    Convert,
}

pub struct GenerateBlockTask {
    volume: Arc<VolumeShared>,
    position: ChunkPos,
    lod: u8,
    world_position: glam::Vec3,
    existing_buffer: Option<VoxelBuffer>,
    stream_dep: Arc<StreamingDependency>,
    cache_save: bool,
    tracker: Option<SharedTracker>,
    cancellation_token: Arc<AtomicBool>,
    priority: PriorityCell,
    stage: Stage,
    gpu_bytes: Mutex<Option<Vec<u8>>>,
    result_buffer: Option<VoxelBuffer>,
    max_lod_hint: Option<u8>,
}

impl GenerateBlockTask {
    pub fn new(
        volume: Arc<VolumeShared>,
        position: ChunkPos,
        lod: u8,
        world_position: glam::Vec3,
        existing_buffer: Option<VoxelBuffer>,
        stream_dep: Arc<StreamingDependency>,
        cache_save: bool,
    ) -> Self {
        Self {
            volume,
            position,
            lod,
            world_position,
            existing_buffer,
            stream_dep,
            cache_save,
            tracker: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            priority: PriorityCell::new(world_position, lod, band2_class::GENERATE),
            stage: Stage::CpuOrSubmit,
            gpu_bytes: Mutex::new(None),
            result_buffer: None,
            max_lod_hint: None,
        }
    }

    pub fn with_tracker(mut self, tracker: SharedTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    /// Called by the GPU runner once device-side generation finishes;
    /// re-queues the task for its convert stage.
    pub fn set_gpu_results(&self, bytes: Vec<u8>) {
        *self.gpu_bytes.lock() = Some(bytes);
    }

    fn too_far(&self) -> bool {
        self.volume.config.drop_beyond_max_distance
            && self.priority.is_too_far(self.volume.config.drop_distance_squared())
    }
}

impl Task for GenerateBlockTask {
    fn run(&mut self) -> RunOutcome {
        if self.stage == Stage::CpuOrSubmit {
            let dep = self.stream_dep.clone();
            let Some(generator) = dep.generator.clone() else {
                self.result_buffer = self.existing_buffer.take();
                return RunOutcome::Finished;
            };
            if generator.supports_gpu() {
                self.stage = Stage::Convert;
                return RunOutcome::TakenOut;
            }

            let mut buffer = self.existing_buffer.take().unwrap_or_else(|| {
                let mut b = VoxelBuffer::create(UVec3::splat(self.volume.config.chunk_size)).expect("valid size");
                b.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
                    .expect("valid channel");
                b
            });
            let origin = self.position.origin_in_voxels(self.lod, self.volume.config.chunk_size);
            let hint = generator.generate_block(&mut buffer, origin, self.lod);
            self.max_lod_hint = hint.max_lod;
            let _ = self.volume.modifiers.apply(&mut buffer, origin, self.lod);
            self.result_buffer = Some(buffer);
        } else {
            // Convert stage: the GPU runner has populated `gpu_bytes`.
            let bytes = self.gpu_bytes.lock().take().unwrap_or_default();
            let mut buffer = self.existing_buffer.take().unwrap_or_else(|| {
                VoxelBuffer::create(UVec3::splat(self.volume.config.chunk_size)).expect("valid size")
            });
            let _ = bytes; // device-specific decode is host-provided; shape only.
            let origin = self.position.origin_in_voxels(self.lod, self.volume.config.chunk_size);
            let _ = self.volume.modifiers.apply(&mut buffer, origin, self.lod);
            self.result_buffer = Some(buffer);
        }

        if self.cache_save {
            if self.stream_dep.stream.is_some() {
                if let Some(buffer) = &self.result_buffer {
                    let save_task = SaveBlockDataTask::for_voxels(
                        self.volume.clone(),
                        self.position,
                        self.lod,
                        buffer.clone(),
                        self.stream_dep.clone(),
                        self.tracker.clone(),
                    );
                    self.volume.pool.submit(Box::new(save_task));
                }
            }
        }

        if let Some(tracker) = &self.tracker {
            tracker.post_complete();
        }

        RunOutcome::Finished
    }

    fn priority(&self) -> TaskPriority {
        let viewers = self.volume.current_viewers();
        self.priority.evaluate(&viewers, self.volume.max_lod())
    }

    fn is_cancelled(&self) -> bool {
        (DEAD_DEPENDENCY_MEANS_CANCELLED && !self.stream_dep.is_valid())
            || self.cancellation_token.load(Ordering::SeqCst)
            || self.too_far()
    }

    fn apply_result(self: Box<Self>, dropped: bool) {
        if dropped {
            self.volume.callbacks.on_data_output(BlockDataOutput {
                kind: BlockDataType::Generated,
                position: self.position,
                lod: self.lod,
                voxels: None,
                dropped: true,
                max_lod_hint: self.max_lod_hint,
                initial_load: true,
                had_voxels: false,
                had_instances: false,
            });
            return;
        }
        let Some(buffer) = self.result_buffer else {
            return;
        };
        let block = DataBlock::with_buffer(buffer, self.lod);
        let voxels = block.voxels.clone();
        self.volume.data.lod(self.lod).expect("valid lod").insert(self.position, block);
        self.volume.callbacks.on_data_output(BlockDataOutput {
            kind: BlockDataType::Generated,
            position: self.position,
            lod: self.lod,
            voxels,
            dropped: false,
            max_lod_hint: self.max_lod_hint,
            initial_load: true,
            had_voxels: true,
            had_instances: false,
        });
    }

    fn lane(&self) -> Lane {
        Lane::Compute
    }
}
