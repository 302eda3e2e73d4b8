//! Task priority evaluation (spec.md §4.4), grounded directly on
//! `original_source/util/tasks/task_priority.h` (`TaskPriority`'s 4-band
//! union-as-u32 layout) and
//! `original_source/engine/priority_dependency.h`/`.cpp` (`evaluate`'s
//! exact band formulas and the lock-free viewer snapshot read).

use std::sync::Arc;

use crate::constants::priority::{BAND0_DISTANCE_SHIFT_BASE, BAND3_DEFAULT, BAND_MAX};

/// A 4-band priority key. `band3` is most significant; greater key means
/// higher priority, matching `TaskPriority::operator<` in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskPriority {
    pub whole: u32,
}

impl TaskPriority {
    pub fn from_bands(band0: u8, band1: u8, band2: u8, band3: u8) -> Self {
        let whole = (band0 as u32) | ((band1 as u32) << 8) | ((band2 as u32) << 16) | ((band3 as u32) << 24);
        Self { whole }
    }

    pub fn bands(self) -> (u8, u8, u8, u8) {
        (
            (self.whole & 0xFF) as u8,
            ((self.whole >> 8) & 0xFF) as u8,
            ((self.whole >> 16) & 0xFF) as u8,
            ((self.whole >> 24) & 0xFF) as u8,
        )
    }

    pub fn min() -> Self {
        Self { whole: 0 }
    }

    pub fn max() -> Self {
        Self { whole: u32::MAX }
    }
}

/// `band2` class constants — caller-supplied, higher preempts lower.
pub mod band2_class {
    pub const SAVE: u8 = 0;
    pub const GENERATE: u8 = 1;
    pub const MESH: u8 = 2;
}

/// Immutable snapshot of viewer positions, read lock-free by evaluators;
/// replacing the viewer set swaps to a new `Arc` rather than mutating
/// this one in place (spec.md §4.4's "resizing the viewer array is
/// handled by swapping to a new immutable snapshot").
pub struct ViewersSnapshot {
    pub viewers: Vec<glam::Vec3>,
    pub highest_view_distance: f32,
}

impl ViewersSnapshot {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            viewers: Vec::new(),
            highest_view_distance: 0.0,
        })
    }
}

/// Evaluates a chunk's priority given the current viewer snapshot.
///
/// Returns the priority plus the squared distance to the closest viewer,
/// which tasks compare against `drop_distance_squared` to self-cancel.
pub fn evaluate(
    viewers: &ViewersSnapshot,
    world_position: glam::Vec3,
    lod_index: u8,
    band2_priority: u8,
    max_lod: u8,
) -> (TaskPriority, f32) {
    let mut closest_distance_sq = f32::MAX;
    for viewer in &viewers.viewers {
        let d = (world_position - *viewer).length_squared();
        if d < closest_distance_sq {
            closest_distance_sq = d;
        }
    }
    if viewers.viewers.is_empty() {
        closest_distance_sq = 0.0;
    }

    let distance = closest_distance_sq.sqrt() as i32;
    let shift = BAND0_DISTANCE_SHIFT_BASE + lod_index as u32;
    let shifted = arithmetic_rshift(distance, shift);
    let band0 = (BAND_MAX as i32 - shifted).clamp(0, BAND_MAX as i32) as u8;
    let band1 = max_lod.saturating_sub(lod_index);
    let priority = TaskPriority::from_bands(band0, band1, band2_priority, BAND3_DEFAULT);
    (priority, closest_distance_sq)
}

fn arithmetic_rshift(value: i32, shift: u32) -> i32 {
    value >> shift.min(31)
}

/// Caches the squared distance from the last `evaluate` call so
/// `Task::is_cancelled` can check "too far" without re-walking the
/// viewer snapshot on every poll (spec.md §4.4/§4.5: priority is
/// recomputed periodically by the pool, not on every cancellation check).
pub struct PriorityCell {
    pub world_position: glam::Vec3,
    pub lod: u8,
    pub band2: u8,
    last_distance_sq: std::sync::atomic::AtomicU32,
}

impl PriorityCell {
    pub fn new(world_position: glam::Vec3, lod: u8, band2: u8) -> Self {
        Self {
            world_position,
            lod,
            band2,
            last_distance_sq: std::sync::atomic::AtomicU32::new(f32::MAX.to_bits()),
        }
    }

    pub fn evaluate(&self, viewers: &ViewersSnapshot, max_lod: u8) -> TaskPriority {
        let (priority, distance_sq) = evaluate(viewers, self.world_position, self.lod, self.band2, max_lod);
        self.last_distance_sq
            .store(distance_sq.to_bits(), std::sync::atomic::Ordering::Relaxed);
        priority
    }

    pub fn last_distance_sq(&self) -> f32 {
        f32::from_bits(self.last_distance_sq.load(std::sync::atomic::Ordering::Relaxed))
    }

    pub fn is_too_far(&self, drop_distance_squared: f32) -> bool {
        self.last_distance_sq() > drop_distance_squared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_key_sorts_greater() {
        let low = TaskPriority::from_bands(0, 0, 0, 0);
        let high = TaskPriority::from_bands(255, 0, 0, 0);
        assert!(high > low);
        let band3_high = TaskPriority::from_bands(0, 0, 0, 1);
        assert!(band3_high > high);
    }

    #[test]
    fn closer_chunk_gets_higher_band0() {
        let viewers = ViewersSnapshot {
            viewers: vec![glam::Vec3::ZERO],
            highest_view_distance: 256.0,
        };
        let (near, _) = evaluate(&viewers, glam::Vec3::new(1.0, 0.0, 0.0), 0, 0, 4);
        let (far, _) = evaluate(&viewers, glam::Vec3::new(1000.0, 0.0, 0.0), 0, 0, 4);
        assert!(near > far);
    }

    #[test]
    fn coarser_lod_gets_higher_band1() {
        let viewers = ViewersSnapshot {
            viewers: vec![glam::Vec3::ZERO],
            highest_view_distance: 256.0,
        };
        let (fine, _) = evaluate(&viewers, glam::Vec3::ZERO, 3, 0, 4);
        let (coarse, _) = evaluate(&viewers, glam::Vec3::ZERO, 0, 0, 4);
        let (_, _, _, fine_b3) = fine.bands();
        let (_, _, _, coarse_b3) = coarse.bands();
        assert_eq!(fine_b3, coarse_b3);
        assert!(coarse.bands().1 > fine.bands().1);
    }

    #[test]
    fn empty_viewers_reports_zero_distance() {
        let viewers = ViewersSnapshot::empty();
        let (_, dist_sq) = evaluate(&viewers, glam::Vec3::new(100.0, 0.0, 0.0), 0, 0, 4);
        assert_eq!(dist_sq, 0.0);
    }
}
