//! `DataBlock`: a chunk record in a `DataMap` (spec.md §3).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::voxel::VoxelBuffer;

pub type SharedVoxelBuffer = Arc<RwLock<VoxelBuffer>>;

/// `DataBlock.viewers` per spec.md §3: number of paired viewers currently
/// needing this block. `DataBlock` no longer needed (`count == 0`) is
/// unloaded on the next sliding-box pass (§4.6).
#[derive(Debug, Default)]
pub struct RefCount(AtomicU32);

impl RefCount {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the count after decrementing; saturates at zero rather than
    /// wrapping on an unbalanced call.
    pub fn decrement(&self) -> u32 {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)))
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A chunk record. A `DataBlock` with `voxels = None` is valid and means
/// "known-empty/unedited" — it avoids re-issuing a load for a position
/// that was already determined to need no storage.
pub struct DataBlock {
    pub voxels: Option<SharedVoxelBuffer>,
    pub modified: bool,
    pub edited: bool,
    pub needs_lodding: bool,
    pub viewers: RefCount,
    pub lod_index: u8,
}

impl DataBlock {
    pub fn empty_marker(lod_index: u8) -> Self {
        Self {
            voxels: None,
            modified: false,
            edited: false,
            needs_lodding: false,
            viewers: RefCount::new(),
            lod_index,
        }
    }

    pub fn with_buffer(buffer: VoxelBuffer, lod_index: u8) -> Self {
        Self {
            voxels: Some(Arc::new(RwLock::new(buffer))),
            modified: false,
            edited: false,
            needs_lodding: false,
            viewers: RefCount::new(),
            lod_index,
        }
    }

    pub fn is_empty_marker(&self) -> bool {
        self.voxels.is_none()
    }

    pub fn mark_edited(&mut self) {
        self.modified = true;
        self.edited = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_does_not_underflow() {
        let rc = RefCount::new();
        assert_eq!(rc.decrement(), 0);
        rc.increment();
        rc.increment();
        assert_eq!(rc.decrement(), 1);
        assert_eq!(rc.decrement(), 0);
    }

    #[test]
    fn empty_marker_has_no_buffer() {
        let block = DataBlock::empty_marker(0);
        assert!(block.is_empty_marker());
    }
}
