//! Output records posted to the per-volume callbacks (spec.md §6).

use crate::data::SharedVoxelBuffer;
use crate::interfaces::{MeshOutput, Surface};
use crate::math::ChunkPos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDataType {
    Loaded,
    Generated,
    Saved,
}

pub struct BlockDataOutput {
    pub kind: BlockDataType,
    pub position: ChunkPos,
    pub lod: u8,
    pub voxels: Option<SharedVoxelBuffer>,
    pub dropped: bool,
    pub max_lod_hint: Option<u8>,
    pub initial_load: bool,
    pub had_voxels: bool,
    pub had_instances: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMeshType {
    Meshed,
    Dropped,
}

pub struct BlockMeshOutput {
    pub kind: BlockMeshType,
    pub position: ChunkPos,
    pub lod: u8,
    pub surfaces: Option<MeshOutput>,
}

/// Posted by the applier's throttled collider pass (spec.md §4.12 step 2),
/// separate from `BlockMeshOutput` since a collider rebuild can lag several
/// ticks behind the visual mesh it was computed alongside.
pub struct ColliderUpdateOutput {
    pub position: ChunkPos,
    pub lod: u8,
    pub collision: Surface,
}

/// Per-volume sink the main-thread applier forwards outputs to. Concrete
/// hosts implement this; the core never assumes a particular delivery
/// mechanism (scene tree signal, channel, callback closure).
pub trait VolumeCallbacks: Send + Sync {
    fn on_data_output(&self, output: BlockDataOutput);
    fn on_mesh_output(&self, output: BlockMeshOutput);
    /// Fired when a data block is unloaded (spec.md §4.6's "rebroadcast a
    /// 'block unloaded' event").
    fn on_block_unloaded(&self, position: ChunkPos, lod: u8) {
        let _ = (position, lod);
    }
    /// Fired by the throttled collider pass; default no-op for hosts that
    /// don't use physics colliders.
    fn on_collider_update(&self, output: ColliderUpdateOutput) {
        let _ = output;
    }
}
