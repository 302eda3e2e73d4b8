//! `LoadBlockDataTask` (spec.md §4.5.a).

use std::sync::Arc;

use crate::data::block::DataBlock;
use crate::dependency::StreamingDependency;
use crate::interfaces::{BlockQuery, StreamError};
use crate::math::ChunkPos;
use crate::output::{BlockDataOutput, BlockDataType};
use crate::priority::{band2_class, TaskPriority};
use crate::volume_shared::VolumeShared;

use super::generate_task::GenerateBlockTask;
use super::task_trait::{Lane, RunOutcome, Task, DEAD_DEPENDENCY_MEANS_CANCELLED};

enum LoadOutcome {
    Loaded(crate::voxel::VoxelBuffer),
    DelegatedToGenerate,
    EmptyMarker,
}

pub struct LoadBlockDataTask {
    volume: Arc<VolumeShared>,
    position: ChunkPos,
    lod: u8,
    world_position: glam::Vec3,
    generate_cache: bool,
    stream_dep: Arc<StreamingDependency>,
    outcome: Option<LoadOutcome>,
}

impl LoadBlockDataTask {
    pub fn new(
        volume: Arc<VolumeShared>,
        position: ChunkPos,
        lod: u8,
        world_position: glam::Vec3,
        generate_cache: bool,
        stream_dep: Arc<StreamingDependency>,
    ) -> Self {
        Self {
            volume,
            position,
            lod,
            world_position,
            generate_cache,
            stream_dep,
            outcome: None,
        }
    }
}

impl Task for LoadBlockDataTask {
    fn run(&mut self) -> RunOutcome {
        let query = BlockQuery {
            position: self.position,
            lod: self.lod,
            block_size: self.volume.config.chunk_size,
        };
        let outcome = match &self.stream_dep.stream {
            None => LoadOutcome::EmptyMarker,
            Some(stream) => match stream.load_voxel_block(&query) {
                Ok(buffer) => LoadOutcome::Loaded(buffer),
                Err(StreamError::NotFound) => {
                    if self.stream_dep.generator.is_some() && self.generate_cache {
                        let task = GenerateBlockTask::new(
                            self.volume.clone(),
                            self.position,
                            self.lod,
                            self.world_position,
                            None,
                            self.stream_dep.clone(),
                            true,
                        );
                        self.volume.pool.submit(Box::new(task));
                        LoadOutcome::DelegatedToGenerate
                    } else {
                        LoadOutcome::EmptyMarker
                    }
                }
                Err(StreamError::Backend(e)) => {
                    log::error!("load failed for {:?} lod {}: {e}", self.position, self.lod);
                    LoadOutcome::EmptyMarker
                }
            },
        };
        self.outcome = Some(outcome);
        RunOutcome::Finished
    }

    fn priority(&self) -> TaskPriority {
        let viewers = self.volume.current_viewers();
        let (priority, _) = crate::priority::evaluate(
            &viewers,
            self.world_position,
            self.lod,
            band2_class::GENERATE,
            self.volume.max_lod(),
        );
        priority
    }

    fn is_cancelled(&self) -> bool {
        DEAD_DEPENDENCY_MEANS_CANCELLED && !self.stream_dep.is_valid()
    }

    fn apply_result(self: Box<Self>, dropped: bool) {
        let was_tracked = self.volume.loading_blocks(self.lod).finish(self.position);
        if dropped || !was_tracked {
            self.volume.callbacks.on_data_output(BlockDataOutput {
                kind: BlockDataType::Loaded,
                position: self.position,
                lod: self.lod,
                voxels: None,
                dropped: true,
                max_lod_hint: None,
                initial_load: true,
                had_voxels: false,
                had_instances: false,
            });
            return;
        }
        match self.outcome {
            Some(LoadOutcome::Loaded(buffer)) => {
                let block = DataBlock::with_buffer(buffer, self.lod);
                let voxels = block.voxels.clone();
                self.volume.data.lod(self.lod).expect("valid lod").insert(self.position, block);
                self.volume.callbacks.on_data_output(BlockDataOutput {
                    kind: BlockDataType::Loaded,
                    position: self.position,
                    lod: self.lod,
                    voxels,
                    dropped: false,
                    max_lod_hint: None,
                    initial_load: true,
                    had_voxels: true,
                    had_instances: false,
                });
            }
            Some(LoadOutcome::DelegatedToGenerate) => {
                // The follow-up GenerateBlockTask posts the final GENERATED
                // result when it completes; nothing to report yet.
            }
            Some(LoadOutcome::EmptyMarker) | None => {
                let marker = DataBlock::empty_marker(self.lod);
                self.volume.data.lod(self.lod).expect("valid lod").insert(self.position, marker);
                self.volume.callbacks.on_data_output(BlockDataOutput {
                    kind: BlockDataType::Loaded,
                    position: self.position,
                    lod: self.lod,
                    voxels: None,
                    dropped: false,
                    max_lod_hint: None,
                    initial_load: true,
                    had_voxels: false,
                    had_instances: false,
                });
            }
        }
    }

    fn lane(&self) -> Lane {
        Lane::Io
    }
}
