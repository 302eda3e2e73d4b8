//! `DataMap`: chunks at one LOD, `position -> DataBlock` (spec.md §3).
//!
//! Grounded on `world/concurrent_chunk_manager.rs`'s
//! `Arc<DashMap<ChunkPos, Arc<RwLock<Chunk>>>>` pattern for the general
//! shape of a concurrent position-keyed chunk map, but using a single
//! `parking_lot::RwLock<HashMap<..>>` instead of `DashMap` per spec.md §5
//! ("Each DataMap has a RW lock; readers lock for lookups, writers lock
//! for insertion, deletion, replacement") — the spec wants one coarse
//! lock per map, not per-shard locking.

use std::collections::HashMap;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::math::ChunkPos;

use super::block::DataBlock;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("block-size must be a power of two, got {0}")]
    InvalidBlockSize(u32),
}

pub struct DataMap {
    blocks: RwLock<FxHashMap<ChunkPos, DataBlock>>,
    block_size_po2: u32,
    lod_index: u8,
}

impl DataMap {
    pub fn new(block_size_po2: u32, lod_index: u8) -> Result<Self, MapError> {
        if !block_size_po2.is_power_of_two() {
            return Err(MapError::InvalidBlockSize(block_size_po2));
        }
        Ok(Self {
            blocks: RwLock::new(HashMap::default()),
            block_size_po2,
            lod_index,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size_po2
    }

    pub fn lod_index(&self) -> u8 {
        self.lod_index
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.blocks.read().contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with read access to the block at `pos`, if present.
    pub fn with_block<R>(&self, pos: ChunkPos, f: impl FnOnce(&DataBlock) -> R) -> Option<R> {
        self.blocks.read().get(&pos).map(f)
    }

    /// Runs `f` with write access to the block at `pos`, if present.
    pub fn with_block_mut<R>(&self, pos: ChunkPos, f: impl FnOnce(&mut DataBlock) -> R) -> Option<R> {
        self.blocks.write().get_mut(&pos).map(f)
    }

    pub fn insert(&self, pos: ChunkPos, block: DataBlock) -> Option<DataBlock> {
        self.blocks.write().insert(pos, block)
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<DataBlock> {
        self.blocks.write().remove(&pos)
    }

    pub fn positions(&self) -> Vec<ChunkPos> {
        self.blocks.read().keys().copied().collect()
    }

    /// Positions whose block is `modified` and has a real voxel buffer —
    /// candidates for a save task on unload.
    pub fn modified_positions(&self) -> Vec<ChunkPos> {
        self.blocks
            .read()
            .iter()
            .filter(|(_, b)| b.modified && !b.is_empty_marker())
            .map(|(pos, _)| *pos)
            .collect()
    }
}
