//! Dense multi-channel chunk storage (spec.md §3/§4.1).

use glam::UVec3;

use super::channel::{BufferError, Channel, ChannelDepth, ChannelKind};
use super::metadata::BlockMetadata;

pub const MAX_CHANNELS: usize = 8;

/// Fixed channel index for signed-distance data, matching
/// `original_source`'s `VoxelBuffer::CHANNEL_SDF`.
pub const CHANNEL_SDF: usize = 0;
/// Fixed channel index for packed texture indices.
pub const CHANNEL_INDICES: usize = 1;
/// Fixed channel index for packed texture weights.
pub const CHANNEL_WEIGHTS: usize = 2;

#[derive(Debug, Clone)]
pub struct VoxelBuffer {
    size: UVec3,
    channels: [Option<Channel>; MAX_CHANNELS],
    metadata: BlockMetadata,
}

impl VoxelBuffer {
    pub fn create(size: UVec3) -> Result<Self, BufferError> {
        if size.x > 65535 || size.y > 65535 || size.z > 65535 {
            return Err(BufferError::OutOfRange(UVec3::ZERO, size));
        }
        Ok(Self {
            size,
            channels: Default::default(),
            metadata: BlockMetadata::new(),
        })
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn voxel_count(&self) -> usize {
        (self.size.x * self.size.y * self.size.z) as usize
    }

    pub fn metadata(&self) -> &BlockMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BlockMetadata {
        &mut self.metadata
    }

    /// Declare a channel with a uniform default value. Re-declaring an
    /// existing channel resets it.
    pub fn set_channel_depth(
        &mut self,
        channel: usize,
        depth: ChannelDepth,
        kind: ChannelKind,
        default: u64,
    ) -> Result<(), BufferError> {
        if channel >= MAX_CHANNELS {
            return Err(BufferError::ChannelIndexOutOfRange(channel));
        }
        self.channels[channel] = Some(Channel::new_uniform(depth, kind, self.voxel_count(), default));
        Ok(())
    }

    pub fn channel(&self, channel: usize) -> Result<&Channel, BufferError> {
        self.channels
            .get(channel)
            .and_then(|c| c.as_ref())
            .ok_or(BufferError::ChannelIndexOutOfRange(channel))
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut Channel, BufferError> {
        self.channels
            .get_mut(channel)
            .and_then(|c| c.as_mut())
            .ok_or(BufferError::ChannelIndexOutOfRange(channel))
    }

    /// `z,x,y` order, Y innermost (matches the host convention that Y is
    /// vertical and iterating along Y is cheapest).
    fn index_of(&self, pos: UVec3) -> Result<usize, BufferError> {
        if pos.x >= self.size.x || pos.y >= self.size.y || pos.z >= self.size.z {
            return Err(BufferError::OutOfRange(pos, self.size));
        }
        Ok(((pos.z * self.size.x + pos.x) * self.size.y + pos.y) as usize)
    }

    pub fn clear(&mut self) {
        for ch in self.channels.iter_mut().flatten() {
            let default = ch.uniform_value().unwrap_or(0);
            *ch = Channel::new_uniform(ch.depth(), ch.kind(), self.voxel_count(), default);
        }
        self.metadata = BlockMetadata::new();
    }

    pub fn fill(&mut self, value: u64, channel: usize) -> Result<(), BufferError> {
        self.channel_mut(channel)?.fill(value);
        Ok(())
    }

    pub fn fill_area(&mut self, value: u64, min: UVec3, max: UVec3, channel: usize) -> Result<(), BufferError> {
        let depth = self.channel(channel)?.depth();
        let _ = depth;
        for z in min.z..max.z {
            for x in min.x..max.x {
                for y in min.y..max.y {
                    let idx = self.index_of(UVec3::new(x, y, z))?;
                    self.channel_mut(channel)?.set(idx, value)?;
                }
            }
        }
        Ok(())
    }

    pub fn get_voxel(&self, pos: UVec3, channel: usize) -> Result<u64, BufferError> {
        let idx = self.index_of(pos)?;
        Ok(self.channel(channel)?.get(idx))
    }

    pub fn set_voxel(&mut self, pos: UVec3, value: u64, channel: usize) -> Result<(), BufferError> {
        let idx = self.index_of(pos)?;
        self.channel_mut(channel)?.set(idx, value)
    }

    pub fn get_voxel_f(&self, pos: UVec3, channel: usize) -> Result<f32, BufferError> {
        let raw = self.get_voxel(pos, channel)?;
        Ok(self.channel(channel)?.sdf_to_float(raw))
    }

    pub fn set_voxel_f(&mut self, pos: UVec3, value: f32, channel: usize) -> Result<(), BufferError> {
        let raw = self.channel(channel)?.sdf_from_float(value);
        self.set_voxel(pos, raw, channel)
    }

    pub fn decompress_channel(&mut self, channel: usize) -> Result<(), BufferError> {
        self.channel_mut(channel)?.decompress()
    }

    pub fn compress_uniform_channels(&mut self) {
        for ch in self.channels.iter_mut().flatten() {
            ch.compress_if_uniform();
        }
    }

    pub fn get_channel_raw(&self, channel: usize) -> Result<&[u8], BufferError> {
        self.channel(channel)?.raw_bytes()
    }

    /// Copy the sub-box `[src_min, src_min+extent)` of `self` into `dst`
    /// starting at `dst_min`, for one channel. Depths must match.
    pub fn copy_to(
        &self,
        dst: &mut VoxelBuffer,
        src_min: UVec3,
        extent: UVec3,
        dst_min: UVec3,
        channel: usize,
    ) -> Result<(), BufferError> {
        let src_depth = self.channel(channel)?.depth();
        let dst_depth = dst.channel(channel)?.depth();
        if src_depth != dst_depth {
            return Err(BufferError::DepthMismatch {
                channel,
                src: src_depth,
                dst: dst_depth,
            });
        }
        for dz in 0..extent.z {
            for dx in 0..extent.x {
                for dy in 0..extent.y {
                    let s = UVec3::new(src_min.x + dx, src_min.y + dy, src_min.z + dz);
                    let d = UVec3::new(dst_min.x + dx, dst_min.y + dy, dst_min.z + dz);
                    let value = self.get_voxel(s, channel)?;
                    dst.set_voxel(d, value, channel)?;
                }
            }
        }
        Ok(())
    }

    pub fn copy_from(
        &mut self,
        src: &VoxelBuffer,
        src_min: UVec3,
        extent: UVec3,
        dst_min: UVec3,
        channel: usize,
    ) -> Result<(), BufferError> {
        src.copy_to(self, src_min, extent, dst_min, channel)
    }

    /// Halves resolution by stride-2 sampling of `[src_min, src_min+2*extent)`
    /// into `dst` at `dst_min..dst_min+extent`. Depth is preserved.
    pub fn downscale_to(
        &self,
        dst: &mut VoxelBuffer,
        src_min: UVec3,
        extent: UVec3,
        dst_min: UVec3,
        channel: usize,
    ) -> Result<(), BufferError> {
        let src_depth = self.channel(channel)?.depth();
        let dst_depth = dst.channel(channel)?.depth();
        if src_depth != dst_depth {
            return Err(BufferError::DepthMismatch {
                channel,
                src: src_depth,
                dst: dst_depth,
            });
        }
        for dz in 0..extent.z {
            for dx in 0..extent.x {
                for dy in 0..extent.y {
                    let s = UVec3::new(
                        src_min.x + dx * 2,
                        src_min.y + dy * 2,
                        src_min.z + dz * 2,
                    );
                    let d = UVec3::new(dst_min.x + dx, dst_min.y + dy, dst_min.z + dz);
                    let value = self.get_voxel(s, channel)?;
                    dst.set_voxel(d, value, channel)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(size: u32) -> VoxelBuffer {
        let mut buf = VoxelBuffer::create(UVec3::splat(size)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
            .unwrap();
        buf
    }

    #[test]
    fn out_of_range_read_fails() {
        let buf = make(4);
        assert!(buf.get_voxel(UVec3::new(4, 0, 0), CHANNEL_SDF).is_err());
    }

    #[test]
    fn compress_decompress_round_trip() {
        let mut buf = make(4);
        buf.set_voxel(UVec3::new(1, 1, 1), 7, CHANNEL_SDF).unwrap();
        let before = buf.get_voxel(UVec3::new(1, 1, 1), CHANNEL_SDF).unwrap();
        buf.decompress_channel(CHANNEL_SDF).unwrap();
        let mid = buf.get_voxel(UVec3::new(1, 1, 1), CHANNEL_SDF).unwrap();
        buf.compress_uniform_channels();
        let after = buf.get_voxel(UVec3::new(1, 1, 1), CHANNEL_SDF).unwrap();
        assert_eq!(before, mid);
        assert_eq!(mid, after);
    }

    #[test]
    fn copy_to_then_copy_from_is_identity_on_overlap() {
        let mut a = make(4);
        a.set_voxel(UVec3::new(0, 0, 0), 3, CHANNEL_SDF).unwrap();
        a.set_voxel(UVec3::new(1, 0, 0), 9, CHANNEL_SDF).unwrap();
        let mut b = make(4);
        a.copy_to(&mut b, UVec3::ZERO, UVec3::splat(2), UVec3::ZERO, CHANNEL_SDF)
            .unwrap();
        let mut c = make(4);
        c.copy_from(&b, UVec3::ZERO, UVec3::splat(2), UVec3::ZERO, CHANNEL_SDF)
            .unwrap();
        assert_eq!(
            a.get_voxel(UVec3::new(0, 0, 0), CHANNEL_SDF).unwrap(),
            c.get_voxel(UVec3::new(0, 0, 0), CHANNEL_SDF).unwrap()
        );
        assert_eq!(
            a.get_voxel(UVec3::new(1, 0, 0), CHANNEL_SDF).unwrap(),
            c.get_voxel(UVec3::new(1, 0, 0), CHANNEL_SDF).unwrap()
        );
    }

    #[test]
    fn downscale_samples_even_corner() {
        let mut src = make(4);
        src.set_voxel(UVec3::new(0, 0, 0), 11, CHANNEL_SDF).unwrap();
        src.set_voxel(UVec3::new(2, 0, 0), 22, CHANNEL_SDF).unwrap();
        let mut dst = make(2);
        src.downscale_to(&mut dst, UVec3::ZERO, UVec3::splat(2), UVec3::ZERO, CHANNEL_SDF)
            .unwrap();
        assert_eq!(dst.get_voxel(UVec3::new(0, 0, 0), CHANNEL_SDF).unwrap(), 11);
        assert_eq!(dst.get_voxel(UVec3::new(1, 0, 0), CHANNEL_SDF).unwrap(), 22);
    }

    #[test]
    fn depth_mismatch_copy_fails() {
        let a = make(2);
        let mut b = VoxelBuffer::create(UVec3::splat(2)).unwrap();
        b.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits32, ChannelKind::Sdf, 0)
            .unwrap();
        let err = a.copy_to(&mut b, UVec3::ZERO, UVec3::splat(2), UVec3::ZERO, CHANNEL_SDF);
        assert!(matches!(err, Err(BufferError::DepthMismatch { .. })));
    }
}
