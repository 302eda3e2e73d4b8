//! `VolumeConfig`: fixed-at-creation parameters for a volume.
//!
//! Mirrors the teacher's `WorldManagerConfig`/`GeneratorConfig`/
//! `StorageConfig` shape (`world/management/world_manager.rs`): plain
//! serde-derived structs with a `Default` impl, constructed directly or
//! loaded by the host from whatever config format it already uses.

use serde::{Deserialize, Serialize};

use crate::constants::core::{DEFAULT_CHUNK_SIZE, DEFAULT_LOD_COUNT, MAX_LOD_COUNT};
use crate::constants::streaming::{DEFAULT_COLLISION_UPDATE_THROTTLE_MS, DEFAULT_DATA_MARGIN_CHUNKS};
use crate::constants::tasks::DEFAULT_MAIN_THREAD_BUDGET_MICROS;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub chunk_size: u32,
    pub lod_count: u8,
    pub mesh_block_size: u32,
    pub view_distance: f32,
    pub lod_distance: f32,
    pub main_thread_drain_budget_micros: u64,
    pub collision_update_throttle_ms: u64,
    pub data_margin_chunks: i32,
    /// Whether generate/mesh tasks should self-cancel once their closest
    /// viewer exceeds `view_distance` by the hysteresis margin.
    pub drop_beyond_max_distance: bool,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            lod_count: DEFAULT_LOD_COUNT,
            mesh_block_size: DEFAULT_CHUNK_SIZE,
            view_distance: 256.0,
            lod_distance: 48.0,
            main_thread_drain_budget_micros: DEFAULT_MAIN_THREAD_BUDGET_MICROS,
            collision_update_throttle_ms: DEFAULT_COLLISION_UPDATE_THROTTLE_MS,
            data_margin_chunks: DEFAULT_DATA_MARGIN_CHUNKS,
            drop_beyond_max_distance: true,
        }
    }
}

impl VolumeConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !self.chunk_size.is_power_of_two() {
            return Err(CoreError::InvalidChunkSize(self.chunk_size));
        }
        if self.lod_count == 0 || self.lod_count > MAX_LOD_COUNT {
            return Err(CoreError::InvalidLodCount(self.lod_count));
        }
        if self.mesh_block_size != self.chunk_size && self.mesh_block_size != self.chunk_size * 2 {
            return Err(CoreError::InvalidMeshBlockSize {
                mesh: self.mesh_block_size,
                chunk: self.chunk_size,
            });
        }
        Ok(())
    }

    /// `drop_distance_squared` per spec.md §4.4: view distance plus a
    /// hysteresis margin of 2x the chunk radius at LOD0.
    pub fn drop_distance_squared(&self) -> f32 {
        let margin = 2.0 * (self.chunk_size as f32 / 2.0);
        let d = self.view_distance + margin;
        d * d
    }
}
