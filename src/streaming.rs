//! Fixed-LOD sliding-box streaming (spec.md §4.6/§4.7): drives the
//! per-viewer unload/load sweep for every LOD except the largest, which
//! is instead covered by the octree grid driver (`octree.rs`, spec.md
//! §4.9). Grounded on `original_source/terrain/variable_lod/
//! voxel_lod_terrain_update_task.cpp`'s `process_unload_data_blocks_
//! sliding_box`/`process_unload_mesh_blocks_sliding_box` pair: symmetric
//! difference of successive boxes drives loads/unloads, with the data
//! box padded a margin wider than the mesh box so neighbor gathers for
//! edge mesh blocks always find their data.

use crate::data::block::SharedVoxelBuffer;
use crate::math::{Box3i, ChunkPos};
use crate::sliding_box::{region_extent, viewer_block_pos, SlidingBox};
use crate::volume_shared::VolumeShared;

#[derive(Debug, Default)]
pub struct StreamingUpdateResult {
    pub data_loads_needed: Vec<(ChunkPos, u8)>,
    pub data_saves_needed: Vec<(ChunkPos, u8, SharedVoxelBuffer)>,
    pub data_unloaded: Vec<(ChunkPos, u8)>,
    pub mesh_unloaded: Vec<(ChunkPos, u8)>,
}

impl StreamingUpdateResult {
    fn merge(&mut self, mut other: StreamingUpdateResult) {
        self.data_loads_needed.append(&mut other.data_loads_needed);
        self.data_saves_needed.append(&mut other.data_saves_needed);
        self.data_unloaded.append(&mut other.data_unloaded);
        self.mesh_unloaded.append(&mut other.mesh_unloaded);
    }
}

/// One `SlidingBox` per (non-largest) LOD for each of the data and mesh
/// maps, since entering/leaving the two boxes is tracked independently
/// (the data box is padded wider, so it doesn't slide in lockstep).
pub struct StreamingDriver {
    data_sliding: Vec<SlidingBox>,
    mesh_sliding: Vec<SlidingBox>,
}

impl StreamingDriver {
    /// `lod_count` is the volume's total LOD count; the top LOD (`lod_count
    /// - 1`) is excluded since the octree grid owns it.
    pub fn new(lod_count: u8) -> Self {
        let levels = lod_count.saturating_sub(1) as usize;
        Self {
            data_sliding: (0..levels).map(|_| SlidingBox::new()).collect(),
            mesh_sliding: (0..levels).map(|_| SlidingBox::new()).collect(),
        }
    }

    pub fn update(&mut self, volume: &VolumeShared, viewer_pos: glam::Vec3) -> StreamingUpdateResult {
        let mut result = StreamingUpdateResult::default();
        let levels = self.data_sliding.len() as u8;
        for lod in 0..levels {
            self.update_mesh_lod(volume, viewer_pos, lod, &mut result);
            self.update_data_lod(volume, viewer_pos, lod, &mut result);
        }
        result
    }

    fn base_box(&self, volume: &VolumeShared, viewer_pos: glam::Vec3, lod: u8) -> Box3i {
        let block_size = volume.config.chunk_size;
        let chunk_world_size = (block_size as f32) * (1u32 << lod) as f32;
        let lod_distance_chunks = (volume.config.lod_distance / chunk_world_size).ceil() as i32;
        let extent = region_extent(lod_distance_chunks, block_size);
        let center = viewer_block_pos(viewer_pos, block_size, lod);
        Box3i::from_center_half_extent(glam::IVec3::from(center), extent)
    }

    fn update_mesh_lod(&mut self, volume: &VolumeShared, viewer_pos: glam::Vec3, lod: u8, result: &mut StreamingUpdateResult) {
        let Ok(mesh_map) = volume.mesh.lod(lod) else {
            return;
        };
        let box_ = self.base_box(volume, viewer_pos, lod);
        let delta = self.mesh_sliding[lod as usize].advance(box_);
        for pos in delta.exited {
            if mesh_map.remove(pos).is_some() {
                result.mesh_unloaded.push((pos, lod));
            }
        }
    }

    fn update_data_lod(&mut self, volume: &VolumeShared, viewer_pos: glam::Vec3, lod: u8, result: &mut StreamingUpdateResult) {
        let Ok(data_map) = volume.data.lod(lod) else {
            return;
        };
        let box_ = self.base_box(volume, viewer_pos, lod).padded(volume.config.data_margin_chunks);
        let delta = self.data_sliding[lod as usize].advance(box_);

        for pos in delta.exited {
            let Some(block) = data_map.remove(pos) else {
                continue;
            };
            if block.modified && !block.is_empty_marker() {
                if let Some(voxels) = block.voxels {
                    result.data_saves_needed.push((pos, lod, voxels));
                }
            }
            result.data_unloaded.push((pos, lod));
            volume.callbacks.on_block_unloaded(pos, lod);
        }

        for pos in delta.entered {
            if !data_map.contains(pos) && volume.loading_blocks(lod).begin(pos) {
                result.data_loads_needed.push((pos, lod));
            }
        }
    }
}
