//! Process-wide, size-keyed chunk byte-buffer pool (spec.md §4.2).
//!
//! Grounded directly on `original_source/voxel_memory_pool.h/.cpp`
//! (`VoxelMemoryPool`): a `HashMap<size, Vec<block>>` guarded by a single
//! mutex, `allocate`/`recycle`/`clear`, plus a `debug_stats` introspection
//! call mirroring `VoxelMemoryPool::debug_print` (SPEC_FULL's supplemented
//! feature). The teacher's own `memory/memory_pool.rs` is GPU-buffer
//! specific (`PoolHandle`, `AllocationStrategy`) and doesn't fit this
//! much simpler size-keyed slab reuse, so this follows the original
//! instead, translated into the teacher's `parking_lot::Mutex` idiom.

use std::collections::HashMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Default)]
struct PoolInner {
    free_lists: FxHashMap<usize, Vec<Vec<u8>>>,
    total_allocated: u64,
    total_recycled: u64,
}

/// A process-wide pool of equally-sized byte buffers.
///
/// Voxel workloads allocate and free many chunk-sized buffers of a
/// handful of distinct sizes (one per channel depth combination); this
/// amortizes that churn instead of going through the global allocator
/// every time.
pub struct ChunkAllocator {
    inner: Mutex<PoolInner>,
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAllocator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Returns a zero-filled buffer of exactly `size` bytes, reused from
    /// the matching free list when possible.
    pub fn allocate(&self, size: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.total_allocated += 1;
        if let Some(list) = inner.free_lists.get_mut(&size) {
            if let Some(mut block) = list.pop() {
                block.iter_mut().for_each(|b| *b = 0);
                return block;
            }
        }
        vec![0u8; size]
    }

    /// Returns a buffer to the pool, keyed by its current length.
    pub fn recycle(&self, block: Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.total_recycled += 1;
        inner.free_lists.entry(block.len()).or_default().push(block);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.free_lists.clear();
    }

    pub fn debug_stats(&self) -> HashMap<usize, usize> {
        let inner = self.inner.lock();
        inner
            .free_lists
            .iter()
            .map(|(size, list)| (*size, list.len()))
            .collect()
    }
}
