//! `loading_blocks: set<position>` per LOD (spec.md §5), guarded by its
//! own mutex so the streaming driver can deduplicate in-flight loads
//! without taking the DataMap's RW lock.

use std::collections::HashSet;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::math::ChunkPos;

#[derive(Default)]
pub struct LoadingBlocks {
    positions: Mutex<FxHashSet<ChunkPos>>,
}

impl LoadingBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `pos` was not already marked loading (i.e. the
    /// caller should actually enqueue a load).
    pub fn begin(&self, pos: ChunkPos) -> bool {
        self.positions.lock().insert(pos)
    }

    pub fn is_loading(&self, pos: ChunkPos) -> bool {
        self.positions.lock().contains(&pos)
    }

    /// Returns `true` if `pos` was actually being tracked; a response for
    /// a position no longer present is a drop that must not enter the map
    /// (spec.md §8 boundary behavior).
    pub fn finish(&self, pos: ChunkPos) -> bool {
        self.positions.lock().remove(&pos)
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_position_is_a_no_op() {
        let lb = LoadingBlocks::new();
        let pos = ChunkPos::new(0, 0, 0);
        assert!(lb.begin(pos));
        assert!(!lb.begin(pos));
    }

    #[test]
    fn finish_for_untracked_position_returns_false() {
        let lb = LoadingBlocks::new();
        assert!(!lb.finish(ChunkPos::new(1, 1, 1)));
    }
}
