//! Per-viewer sliding box bookkeeping shared by the data-map and mesh-map
//! unload passes (spec.md §4.6/§4.7): tracks the previous box of required
//! chunks at one LOD and, given a new box, reports what entered and what
//! left.

use crate::math::{Box3i, ChunkPos};

/// Half-extent (in chunks) of the sliding box at a LOD, derived from the
/// LOD's view distance in chunk units.
pub fn region_extent(lod_distance_chunks: i32, _block_size: u32) -> i32 {
    lod_distance_chunks.max(0)
}

pub fn viewer_block_pos(viewer_pos: glam::Vec3, block_size: u32, lod: u8) -> ChunkPos {
    let scale = (block_size as f32) * (1u32 << lod) as f32;
    ChunkPos::new(
        (viewer_pos.x / scale).floor() as i32,
        (viewer_pos.y / scale).floor() as i32,
        (viewer_pos.z / scale).floor() as i32,
    )
}

#[derive(Default)]
pub struct SlidingBox {
    current: Option<Box3i>,
}

pub struct SlidingBoxDelta {
    pub entered: Vec<ChunkPos>,
    pub exited: Vec<ChunkPos>,
}

impl SlidingBox {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn current(&self) -> Option<Box3i> {
        self.current
    }

    /// Advance to `new_box`, returning the symmetric difference against
    /// the previous box. The first call (no previous box) reports every
    /// position in `new_box` as entered.
    pub fn advance(&mut self, new_box: Box3i) -> SlidingBoxDelta {
        let delta = match self.current {
            None => SlidingBoxDelta {
                entered: new_box.iter_positions().map(ChunkPos::from).collect(),
                exited: Vec::new(),
            },
            Some(prev) => SlidingBoxDelta {
                entered: new_box.difference(&prev).into_iter().map(ChunkPos::from).collect(),
                exited: prev.difference(&new_box).into_iter().map(ChunkPos::from).collect(),
            },
        };
        self.current = Some(new_box);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_advance_reports_everything_as_entered() {
        let mut sb = SlidingBox::new();
        let box_ = Box3i::from_center_half_extent(glam::IVec3::ZERO, 1);
        let delta = sb.advance(box_);
        assert_eq!(delta.entered.len(), 3 * 3 * 3);
        assert!(delta.exited.is_empty());
    }

    #[test]
    fn sliding_one_step_only_touches_the_boundary_layer() {
        let mut sb = SlidingBox::new();
        sb.advance(Box3i::from_center_half_extent(glam::IVec3::new(0, 0, 0), 1));
        let delta = sb.advance(Box3i::from_center_half_extent(glam::IVec3::new(1, 0, 0), 1));
        assert!(!delta.entered.is_empty());
        assert!(!delta.exited.is_empty());
        assert_eq!(delta.entered.len(), delta.exited.len());
    }
}
