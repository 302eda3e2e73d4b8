//! Pluggable producer/sink contracts (spec.md §4.3).
//!
//! Grounded on the teacher's `world/interfaces/generator_interface.rs`
//! (a plain trait implemented by concrete backends, dispatched through a
//! small wrapper rather than a registry) — only the trait shapes are kept
//! here since concrete generator/mesher/stream implementations are
//! explicitly out of scope (spec.md §1).

use crate::math::ChunkPos;
use crate::voxel::VoxelBuffer;

/// Hint returned by a generator about how coarse the terrain gets beyond
/// this block, letting the octree driver skip unnecessary finer LODs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxLodHint {
    pub max_lod: Option<u8>,
}

/// Produces voxel data for a block that isn't in storage yet. Must be
/// thread-safe; `generate_block` may take arbitrary time and is always
/// called off the main thread.
pub trait Generator: Send + Sync {
    fn generate_block(&self, buffer: &mut VoxelBuffer, origin_in_voxels: glam::IVec3, lod: u8) -> MaxLodHint;

    /// Optional fast path: answers whether the whole block is trivially
    /// uniform (e.g. far above terrain) without materializing voxels.
    fn is_block_trivially_uniform(&self, _origin_in_voxels: glam::IVec3, _lod: u8) -> Option<u64> {
        None
    }

    fn supports_gpu(&self) -> bool {
        false
    }
}

pub struct BlockQuery {
    pub position: ChunkPos,
    pub lod: u8,
    pub block_size: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("block not found")]
    NotFound,
    #[error("stream backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// A persistent store. I/O is expected to be serial per-volume (spec.md
/// §4.5's I/O lane enforces this at the scheduler level; implementations
/// don't need internal locking for that reason alone).
pub trait Stream: Send + Sync {
    fn load_voxel_block(&self, query: &BlockQuery) -> Result<VoxelBuffer, StreamError>;
    fn save_voxel_block(&self, query: &BlockQuery, buffer: &VoxelBuffer) -> Result<(), StreamError>;

    fn supports_bulk_load(&self) -> bool {
        false
    }
    fn load_all_blocks(&self) -> Result<Vec<(BlockQuery, VoxelBuffer)>, StreamError> {
        Ok(Vec::new())
    }

    fn supports_instances(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Triangles,
}

#[derive(Debug, Clone, Default)]
pub struct Surface {
    pub positions: Vec<glam::Vec3>,
    pub normals: Vec<glam::Vec3>,
    pub indices: Vec<u32>,
    pub uvs: Vec<glam::Vec2>,
    pub material_ids: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct MeshOutput {
    pub primitive_type: Option<PrimitiveType>,
    pub mesh_flags: u32,
    pub main: Vec<Surface>,
    /// 4 per mesh block, one per cube-axis side that may face lower detail.
    pub transitions: [Vec<Surface>; 4],
    pub collision: Option<Surface>,
}

pub struct MesherInputs<'a> {
    /// Neighbor data buffers: 3x3x3 or 4x4x4 depending on the mesh-block
    /// to data-block size ratio, flattened in `z,x,y` order.
    pub neighbor_buffers: &'a [&'a VoxelBuffer],
    pub lod: u8,
}

/// Converts voxel data into renderable (and optionally collidable)
/// surfaces. Must be thread-safe.
pub trait Mesher: Send + Sync {
    fn build(&self, inputs: &MesherInputs<'_>) -> MeshOutput;
}
