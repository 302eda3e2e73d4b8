//! Modifiers (SPEC_FULL supplemented feature), grounded on
//! `original_source/engine/generate_block_task.cpp`'s
//! `data->get_modifiers().apply(...)`: a registered list of volumetric
//! operators applied on top of generator output inside `GenerateBlockTask`,
//! each scoped to an AABB so only intersecting blocks pay for it.

use crate::math::Box3i;
use crate::voxel::buffer::BufferError;
use crate::voxel::VoxelBuffer;

/// A volumetric operator applied to generator output before it is handed
/// back to the task pipeline.
pub trait Modifier: Send + Sync {
    /// World-space AABB (in voxels at LOD0) this modifier affects.
    fn aabb(&self) -> Box3i;

    /// Apply the modifier to `buffer`, whose voxels occupy `buffer_origin
    /// .. buffer_origin + buffer.size() << lod` in LOD0 voxel space.
    fn apply(&self, buffer: &mut VoxelBuffer, buffer_origin: glam::IVec3, lod: u8) -> Result<(), BufferError>;
}

/// A sphere subtraction modifier, the canonical example from the original
/// engine (`sphere subtraction` named directly in SPEC_FULL's notes).
pub struct SphereSubtract {
    pub center: glam::Vec3,
    pub radius: f32,
    pub channel: usize,
}

impl Modifier for SphereSubtract {
    fn aabb(&self) -> Box3i {
        let r = self.radius.ceil() as i32;
        Box3i::from_center_half_extent(self.center.as_ivec3(), r)
    }

    fn apply(&self, buffer: &mut VoxelBuffer, buffer_origin: glam::IVec3, lod: u8) -> Result<(), BufferError> {
        let scale = (1u32 << lod) as f32;
        let size = buffer.size();
        for z in 0..size.z {
            for x in 0..size.x {
                for y in 0..size.y {
                    let world = buffer_origin.as_vec3()
                        + glam::Vec3::new(x as f32, y as f32, z as f32) * scale;
                    let dist = (world - self.center).length() - self.radius;
                    let sdf = (dist / scale).clamp(-1.0, 1.0);
                    let existing = buffer.get_voxel_f(glam::UVec3::new(x, y, z), self.channel)?;
                    if sdf.max(existing) != existing {
                        buffer.set_voxel_f(glam::UVec3::new(x, y, z), sdf.max(existing), self.channel)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ModifierStack {
    modifiers: Vec<Box<dyn Modifier>>,
}

impl ModifierStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, modifier: Box<dyn Modifier>) {
        self.modifiers.push(modifier);
    }

    /// Apply every registered modifier whose AABB intersects the block's
    /// voxel-space bounds.
    pub fn apply(
        &self,
        buffer: &mut VoxelBuffer,
        buffer_origin: glam::IVec3,
        lod: u8,
    ) -> Result<(), BufferError> {
        let size = buffer.size();
        let extent = (size.as_ivec3()) * (1 << lod);
        let block_box = Box3i::new(buffer_origin, buffer_origin + extent);
        for modifier in &self.modifiers {
            if modifier.aabb().intersects(&block_box) {
                modifier.apply(buffer, buffer_origin, lod)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::buffer::CHANNEL_SDF;
    use crate::voxel::channel::{ChannelDepth, ChannelKind};

    #[test]
    fn modifier_outside_block_is_skipped() {
        let mut buf = VoxelBuffer::create(glam::UVec3::splat(4)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
            .unwrap();
        let mut stack = ModifierStack::new();
        stack.register(Box::new(SphereSubtract {
            center: glam::Vec3::splat(1000.0),
            radius: 2.0,
            channel: CHANNEL_SDF,
        }));
        let before = buf.get_voxel(glam::UVec3::new(1, 1, 1), CHANNEL_SDF).unwrap();
        stack.apply(&mut buf, glam::IVec3::ZERO, 0).unwrap();
        let after = buf.get_voxel(glam::UVec3::new(1, 1, 1), CHANNEL_SDF).unwrap();
        assert_eq!(before, after);
    }
}
