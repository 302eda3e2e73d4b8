//! Box-range lock (SPEC_FULL supplemented feature), grounded on
//! `original_source/util/thread/spatial_lock_3d.cpp` and
//! `original_source/storage/voxel_spatial_lock.cpp`: lets two tasks that
//! touch disjoint regions of the same LOD proceed without blocking on
//! the DataMap's coarse RW lock, by registering the boxes they're
//! currently working on and waiting only when boxes actually overlap.

use std::sync::Condvar;

use parking_lot::Mutex;

use crate::math::Box3i;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

struct Entry {
    box_: Box3i,
    mode: LockMode,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
}

/// A box-range reader/writer lock. `acquire` blocks until no registered
/// box overlaps `box_` under a conflicting mode, then registers `box_`
/// and returns a guard that removes it on drop.
pub struct SpatialLock {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for SpatialLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            condvar: Condvar::new(),
        }
    }

    fn conflicts(a: &Entry, box_: &Box3i, mode: LockMode) -> bool {
        if !a.box_.intersects(box_) {
            return false;
        }
        matches!((a.mode, mode), (LockMode::Write, _) | (_, LockMode::Write))
    }

    pub fn acquire(&self, box_: Box3i, mode: LockMode) -> SpatialLockGuard<'_> {
        let mut inner = self.inner.lock();
        loop {
            if !inner.entries.iter().any(|e| Self::conflicts(e, &box_, mode)) {
                inner.entries.push(Entry { box_, mode });
                break;
            }
            self.condvar.wait(&mut inner);
        }
        SpatialLockGuard { lock: self, box_ }
    }

    fn release(&self, box_: &Box3i) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.entries.iter().position(|e| &e.box_ == box_) {
            inner.entries.swap_remove(idx);
        } else {
            log::error!("spatial lock release for a box not currently held: {box_:?}");
        }
        drop(inner);
        self.condvar.notify_all();
    }
}

pub struct SpatialLockGuard<'a> {
    lock: &'a SpatialLock,
    box_: Box3i,
}

impl Drop for SpatialLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.box_);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_read_locks_do_not_block() {
        let lock = SpatialLock::new();
        let a = Box3i::new(glam::IVec3::ZERO, glam::IVec3::splat(2));
        let b = Box3i::new(glam::IVec3::splat(10), glam::IVec3::splat(12));
        let g1 = lock.acquire(a, LockMode::Read);
        let g2 = lock.acquire(b, LockMode::Read);
        drop(g1);
        drop(g2);
    }

    #[test]
    fn overlapping_read_locks_coexist() {
        let lock = SpatialLock::new();
        let a = Box3i::new(glam::IVec3::ZERO, glam::IVec3::splat(4));
        let b = Box3i::new(glam::IVec3::splat(2), glam::IVec3::splat(6));
        let g1 = lock.acquire(a, LockMode::Read);
        let g2 = lock.acquire(b, LockMode::Read);
        drop(g1);
        drop(g2);
    }
}
