//! `MeshMap`: per-LOD map of `position -> MeshBlock` (spec.md §3/§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::math::ChunkPos;

use super::block::MeshBlock;

pub struct MeshMap {
    blocks: RwLock<FxHashMap<ChunkPos, Arc<MeshBlock>>>,
    lod_index: u8,
}

impl MeshMap {
    pub fn new(lod_index: u8) -> Self {
        Self {
            blocks: RwLock::new(HashMap::default()),
            lod_index,
        }
    }

    pub fn lod_index(&self) -> u8 {
        self.lod_index
    }

    pub fn get_or_insert(&self, pos: ChunkPos) -> Arc<MeshBlock> {
        if let Some(existing) = self.blocks.read().get(&pos) {
            return existing.clone();
        }
        self.blocks
            .write()
            .entry(pos)
            .or_insert_with(|| Arc::new(MeshBlock::new()))
            .clone()
    }

    pub fn get(&self, pos: ChunkPos) -> Option<Arc<MeshBlock>> {
        self.blocks.read().get(&pos).cloned()
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<Arc<MeshBlock>> {
        self.blocks.write().remove(&pos)
    }

    pub fn positions(&self) -> Vec<ChunkPos> {
        self.blocks.read().keys().copied().collect()
    }

    /// Snapshot of every resident `(position, block)` pair, used by the
    /// applier's throttled collider sweep (spec.md §4.12 step 2).
    pub fn entries(&self) -> Vec<(ChunkPos, Arc<MeshBlock>)> {
        self.blocks.read().iter().map(|(pos, block)| (*pos, block.clone())).collect()
    }

    pub fn active_positions(&self) -> Vec<ChunkPos> {
        self.blocks
            .read()
            .iter()
            .filter(|(_, b)| b.active.load(std::sync::atomic::Ordering::SeqCst))
            .map(|(pos, _)| *pos)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_is_idempotent() {
        let map = MeshMap::new(0);
        let pos = ChunkPos::new(1, 1, 1);
        let a = map.get_or_insert(pos);
        let b = map.get_or_insert(pos);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn active_positions_reflects_flag() {
        let map = MeshMap::new(0);
        let pos = ChunkPos::new(0, 0, 0);
        let block = map.get_or_insert(pos);
        assert!(map.active_positions().is_empty());
        block.active.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(map.active_positions(), vec![pos]);
    }
}
