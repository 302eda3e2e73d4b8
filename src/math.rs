//! Position and box types shared across the crate.
//!
//! Grounded on `world/core/position.rs` (`ChunkPos`/`VoxelPos`) in the
//! teacher repo: plain `Copy` structs with `serde` derives rather than
//! wrapping a math-library vector, so hashing and `Ord` stay cheap and
//! explicit. `glam::Vec3` is used only where floating point viewer-space
//! math is unavoidable (distances, world positions).

use serde::{Deserialize, Serialize};

/// Integer position of a chunk, in units of "chunks at its own LOD".
///
/// `position << (lod * chunk_size)` (spec.md §3) gives the origin of the
/// chunk in voxel space at LOD0 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const ZERO: ChunkPos = ChunkPos { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Position of the parent chunk one LOD up (`src >> 1`, spec.md §4.10).
    pub fn parent(self) -> Self {
        Self::new(self.x >> 1, self.y >> 1, self.z >> 1)
    }

    /// The 8 child positions one LOD down.
    pub fn children(self) -> [ChunkPos; 8] {
        let bx = self.x << 1;
        let by = self.y << 1;
        let bz = self.z << 1;
        let mut out = [ChunkPos::ZERO; 8];
        let mut i = 0;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    out[i] = ChunkPos::new(bx + dx, by + dy, bz + dz);
                    i += 1;
                }
            }
        }
        out
    }

    /// Which octant (0..8) this position is within its parent, used to place
    /// a downscaled child into the correct corner of the parent buffer.
    pub fn octant_in_parent(self) -> usize {
        ((self.x & 1) | ((self.y & 1) << 1) | ((self.z & 1) << 2)) as usize
    }

    /// Origin of this chunk in LOD0 voxel space.
    pub fn origin_in_voxels(self, lod: u8, chunk_size: u32) -> glam::IVec3 {
        let scale = (chunk_size as i32) << lod;
        glam::IVec3::new(self.x * scale, self.y * scale, self.z * scale)
    }

    pub fn distance_squared_to(self, other: ChunkPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }

    pub fn to_vec3(self) -> glam::Vec3 {
        glam::Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }
}

impl std::ops::Add<ChunkPos> for ChunkPos {
    type Output = ChunkPos;
    fn add(self, rhs: ChunkPos) -> ChunkPos {
        ChunkPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub<ChunkPos> for ChunkPos {
    type Output = ChunkPos;
    fn sub(self, rhs: ChunkPos) -> ChunkPos {
        ChunkPos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl From<ChunkPos> for glam::IVec3 {
    fn from(p: ChunkPos) -> glam::IVec3 {
        glam::IVec3::new(p.x, p.y, p.z)
    }
}

impl From<glam::IVec3> for ChunkPos {
    fn from(v: glam::IVec3) -> ChunkPos {
        ChunkPos::new(v.x, v.y, v.z)
    }
}

/// Identity of a chunk: its position at its own LOD, plus the LOD index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub position: ChunkPos,
    pub lod: u8,
}

impl ChunkKey {
    pub fn new(position: ChunkPos, lod: u8) -> Self {
        Self { position, lod }
    }
}

/// A local voxel offset within a chunk (0..chunk_size on each axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl LocalPos {
    pub fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }
}

/// Inclusive-exclusive axis-aligned integer box `[min, max)`, used for
/// sliding boxes, edit regions, and octree node bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Box3i {
    pub min: glam::IVec3,
    pub max: glam::IVec3,
}

impl Box3i {
    pub fn new(min: glam::IVec3, max: glam::IVec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extent(center: glam::IVec3, half_extent: i32) -> Self {
        Self {
            min: center - glam::IVec3::splat(half_extent),
            max: center + glam::IVec3::splat(half_extent + 1),
        }
    }

    pub fn contains(&self, p: glam::IVec3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x < self.max.x
            && p.y < self.max.y
            && p.z < self.max.z
    }

    /// Grow the box outward by `n` on every side.
    pub fn padded(&self, n: i32) -> Box3i {
        Box3i::new(self.min - glam::IVec3::splat(n), self.max + glam::IVec3::splat(n))
    }

    pub fn intersects(&self, other: &Box3i) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Axis-aligned squared distance from a point to the box (0 if inside).
    pub fn distance_squared_to_point(&self, p: glam::Vec3) -> f32 {
        let dx = (self.min.x as f32 - p.x).max(0.0).max(p.x - self.max.x as f32);
        let dy = (self.min.y as f32 - p.y).max(0.0).max(p.y - self.max.y as f32);
        let dz = (self.min.z as f32 - p.z).max(0.0).max(p.z - self.max.z as f32);
        dx * dx + dy * dy + dz * dz
    }

    /// Iterate all integer positions inside the box (exclusive max).
    pub fn iter_positions(&self) -> impl Iterator<Item = glam::IVec3> + '_ {
        let Box3i { min, max } = *self;
        (min.z..max.z).flat_map(move |z| {
            (min.y..max.y).flat_map(move |y| (min.x..max.x).map(move |x| glam::IVec3::new(x, y, z)))
        })
    }

    /// Positions in `self` that are not in `other` (set difference).
    pub fn difference(&self, other: &Box3i) -> Vec<glam::IVec3> {
        self.iter_positions().filter(|p| !other.contains(*p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_child_round_trip() {
        let p = ChunkPos::new(5, -3, 9);
        for child in p.children() {
            assert_eq!(child.parent(), p);
        }
    }

    #[test]
    fn octant_covers_all_eight_children() {
        let p = ChunkPos::new(2, 2, 2);
        let mut seen = [false; 8];
        for child in p.children() {
            seen[child.octant_in_parent()] = true;
        }
        assert!(seen.iter().all(|&b| b));
    }

    #[test]
    fn box_difference_excludes_overlap() {
        let a = Box3i::new(glam::IVec3::ZERO, glam::IVec3::splat(4));
        let b = Box3i::new(glam::IVec3::splat(2), glam::IVec3::splat(6));
        let diff = a.difference(&b);
        assert!(diff.iter().all(|p| !b.contains(*p)));
        assert_eq!(diff.len(), 4 * 4 * 4 - 2 * 2 * 2);
    }

    #[test]
    fn distance_squared_zero_when_inside() {
        let b = Box3i::from_center_half_extent(glam::IVec3::ZERO, 4);
        assert_eq!(b.distance_squared_to_point(glam::Vec3::ZERO), 0.0);
    }
}
