//! `MeshBlockTask` (spec.md §4.5.d), grounded on
//! `original_source/server/mesh_block_task.h`: gathers a 3x3x3 or 4x4x4
//! grid of neighbor data buffers (depending on the mesh/data block size
//! ratio), runs the mesher once, and posts main + transition + collision
//! surfaces. Cancellation mirrors `GenerateBlockTask` with respect to
//! `too_far`.

use std::sync::Arc;

use crate::dependency::MeshingDependency;
use crate::interfaces::{MesherInputs, MeshOutput};
use crate::math::ChunkPos;
use crate::output::{BlockMeshOutput, BlockMeshType};
use crate::priority::{band2_class, PriorityCell, TaskPriority};
use crate::volume_shared::VolumeShared;
use crate::voxel::VoxelBuffer;

use super::task_trait::{Lane, RunOutcome, Task, DEAD_DEPENDENCY_MEANS_CANCELLED};

pub struct MeshBlockTask {
    volume: Arc<VolumeShared>,
    position: ChunkPos,
    lod: u8,
    collision_hint: bool,
    meshing_dep: Arc<MeshingDependency>,
    priority: PriorityCell,
    neighbors: Vec<VoxelBuffer>,
    result: Option<MeshOutput>,
}

impl MeshBlockTask {
    pub fn new(
        volume: Arc<VolumeShared>,
        position: ChunkPos,
        lod: u8,
        world_position: glam::Vec3,
        collision_hint: bool,
        meshing_dep: Arc<MeshingDependency>,
    ) -> Self {
        let ratio = mesh_to_data_ratio(&volume);
        let neighbors = gather_neighbors(&volume, position, lod, ratio);
        Self {
            volume,
            position,
            lod,
            collision_hint,
            meshing_dep,
            priority: PriorityCell::new(world_position, lod, band2_class::MESH),
            neighbors,
            result: None,
        }
    }

    fn too_far(&self) -> bool {
        self.volume.config.drop_beyond_max_distance
            && self.priority.is_too_far(self.volume.config.drop_distance_squared())
    }
}

/// `mesh_block_size / chunk_size`, which `VolumeConfig::validate` already
/// constrains to 1 or 2 (spec.md §9's mesh/data block ratio note).
fn mesh_to_data_ratio(volume: &VolumeShared) -> u32 {
    (volume.config.mesh_block_size / volume.config.chunk_size).max(1)
}

/// Gathers the `(ratio + 2)^3` grid of data buffers surrounding `position`
/// (a mesh-block position), substituting an empty buffer for any data
/// block that isn't loaded.
fn gather_neighbors(volume: &VolumeShared, position: ChunkPos, lod: u8, ratio: u32) -> Vec<VoxelBuffer> {
    let data_map = match volume.data.lod(lod) {
        Ok(map) => map,
        Err(_) => return Vec::new(),
    };
    let base = glam::IVec3::from(position) * ratio as i32;
    let span = ratio as i32 + 2;
    let mut out = Vec::with_capacity((span * span * span) as usize);
    for dz in 0..span {
        for dx in 0..span {
            for dy in 0..span {
                let neighbor_pos = ChunkPos::from(base + glam::IVec3::new(dx - 1, dy - 1, dz - 1));
                let buffer = data_map
                    .with_block(neighbor_pos, |block| block.voxels.clone())
                    .flatten()
                    .map(|shared| shared.read().clone())
                    .unwrap_or_else(|| empty_neighbor(volume));
                out.push(buffer);
            }
        }
    }
    out
}

fn empty_neighbor(volume: &VolumeShared) -> VoxelBuffer {
    VoxelBuffer::create(glam::UVec3::splat(volume.config.chunk_size)).expect("valid chunk size")
}

impl Task for MeshBlockTask {
    fn run(&mut self) -> RunOutcome {
        let Some(mesher) = self.meshing_dep.mesher.clone() else {
            return RunOutcome::Finished;
        };
        let refs: Vec<&VoxelBuffer> = self.neighbors.iter().collect();
        let inputs = MesherInputs {
            neighbor_buffers: &refs,
            lod: self.lod,
        };
        let mut output = mesher.build(&inputs);
        if !self.collision_hint {
            output.collision = None;
        }
        self.result = Some(output);
        RunOutcome::Finished
    }

    fn priority(&self) -> TaskPriority {
        let viewers = self.volume.current_viewers();
        self.priority.evaluate(&viewers, self.volume.max_lod())
    }

    fn is_cancelled(&self) -> bool {
        (DEAD_DEPENDENCY_MEANS_CANCELLED && !self.meshing_dep.is_valid()) || self.too_far()
    }

    fn apply_result(self: Box<Self>, dropped: bool) {
        if !self.meshing_dep.is_valid() {
            return;
        }
        if dropped || self.result.is_none() {
            self.volume.callbacks.on_mesh_output(BlockMeshOutput {
                kind: BlockMeshType::Dropped,
                position: self.position,
                lod: self.lod,
                surfaces: None,
            });
            return;
        }
        let mesh_block = self.volume.mesh.lod(self.lod).expect("valid lod").get_or_insert(self.position);
        let became_up_to_date = mesh_block.apply_result();
        if !became_up_to_date {
            log::trace!(
                "mesh result for {:?} lod {} raced an edit, re-scheduling",
                self.position,
                self.lod
            );
        }
        let mut surfaces = self.result;
        let collision = surfaces.as_mut().and_then(|s| s.collision.take());
        mesh_block.stash_collision(collision);
        self.volume.callbacks.on_mesh_output(BlockMeshOutput {
            kind: BlockMeshType::Meshed,
            position: self.position,
            lod: self.lod,
            surfaces,
        });
    }

    fn lane(&self) -> Lane {
        Lane::Compute
    }
}
