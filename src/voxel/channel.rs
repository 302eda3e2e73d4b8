//! Single-channel dense storage with a uniform/expanded compression state.
//!
//! Grounded on the teacher's `world/storage/cpu_chunks.rs` `AlignedArray<T>` /
//! `ChunkSoA` idea of a flat byte buffer indexed by a coordinate-to-offset
//! function, but indexed in the spec's `z,x,y` order (Y innermost, matching
//! "iteration along Y is cheapest") instead of the teacher's Morton order,
//! and carrying an explicit uniform/expanded compression state rather than
//! always being dense (spec.md §3/§4.1).

use serde::{Deserialize, Serialize};

use crate::constants::quantization::{SDF_16_BIT_SCALE, SDF_8_BIT_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelDepth {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

impl ChannelDepth {
    pub fn byte_size(self) -> usize {
        match self {
            ChannelDepth::Bits8 => 1,
            ChannelDepth::Bits16 => 2,
            ChannelDepth::Bits32 => 4,
            ChannelDepth::Bits64 => 8,
        }
    }

    pub fn max_value(self) -> u64 {
        match self {
            ChannelDepth::Bits8 => u8::MAX as u64,
            ChannelDepth::Bits16 => u16::MAX as u64,
            ChannelDepth::Bits32 => u32::MAX as u64,
            ChannelDepth::Bits64 => u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelKind {
    Generic,
    Sdf,
    IndicesWeights,
}

/// Per-channel compression state: either a single default value with no
/// backing array, or a materialized flat byte array.
#[derive(Debug, Clone)]
enum Storage {
    Uniform(u64),
    Expanded(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Channel {
    depth: ChannelDepth,
    kind: ChannelKind,
    storage: Storage,
    voxel_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("position {0:?} out of range for size {1:?}")]
    OutOfRange(glam::UVec3, glam::UVec3),
    #[error("channel {0} has no storage (uniform) and cannot be raw-indexed")]
    ChannelUniform(usize),
    #[error("channel index {0} out of range (max 8)")]
    ChannelIndexOutOfRange(usize),
    #[error("depth mismatch copying channel {channel}: {src:?} vs {dst:?}")]
    DepthMismatch {
        channel: usize,
        src: ChannelDepth,
        dst: ChannelDepth,
    },
    #[error("allocation failed for {0} bytes")]
    AllocationFailed(usize),
}

impl Channel {
    pub fn new_uniform(depth: ChannelDepth, kind: ChannelKind, voxel_count: usize, default: u64) -> Self {
        Self {
            depth,
            kind,
            storage: Storage::Uniform(default & depth.max_value()),
            voxel_count,
        }
    }

    pub fn depth(&self) -> ChannelDepth {
        self.depth
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self.storage, Storage::Uniform(_))
    }

    pub fn uniform_value(&self) -> Option<u64> {
        match self.storage {
            Storage::Uniform(v) => Some(v),
            Storage::Expanded(_) => None,
        }
    }

    /// Materialize the backing array if currently uniform.
    pub fn decompress(&mut self) -> Result<(), BufferError> {
        if let Storage::Uniform(value) = self.storage {
            let byte_size = self.depth.byte_size();
            let mut bytes = vec![0u8; byte_size * self.voxel_count];
            for i in 0..self.voxel_count {
                write_raw(&mut bytes[i * byte_size..(i + 1) * byte_size], value);
            }
            self.storage = Storage::Expanded(bytes);
        }
        Ok(())
    }

    /// If expanded and every cell is equal, release the array.
    pub fn compress_if_uniform(&mut self) {
        if let Storage::Expanded(bytes) = &self.storage {
            let byte_size = self.depth.byte_size();
            if bytes.is_empty() {
                return;
            }
            let first = read_raw(&bytes[0..byte_size]);
            let all_equal = bytes
                .chunks_exact(byte_size)
                .all(|chunk| read_raw(chunk) == first);
            if all_equal {
                self.storage = Storage::Uniform(first);
            }
        }
    }

    pub fn fill(&mut self, value: u64) {
        let value = value & self.depth.max_value();
        match &mut self.storage {
            Storage::Uniform(v) => *v = value,
            Storage::Expanded(bytes) => {
                let byte_size = self.depth.byte_size();
                for chunk in bytes.chunks_exact_mut(byte_size) {
                    write_raw(chunk, value);
                }
            }
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        match &self.storage {
            Storage::Uniform(v) => *v,
            Storage::Expanded(bytes) => {
                let byte_size = self.depth.byte_size();
                read_raw(&bytes[index * byte_size..(index + 1) * byte_size])
            }
        }
    }

    pub fn set(&mut self, index: usize, value: u64) -> Result<(), BufferError> {
        let value = value & self.depth.max_value();
        if self.is_uniform() {
            if self.uniform_value() == Some(value) {
                return Ok(());
            }
            self.decompress()?;
        }
        if let Storage::Expanded(bytes) = &mut self.storage {
            let byte_size = self.depth.byte_size();
            write_raw(&mut bytes[index * byte_size..(index + 1) * byte_size], value);
        }
        Ok(())
    }

    pub fn raw_bytes(&self) -> Result<&[u8], BufferError> {
        match &self.storage {
            Storage::Expanded(bytes) => Ok(bytes),
            Storage::Uniform(_) => Err(BufferError::ChannelUniform(0)),
        }
    }

    /// SDF channels quantize a float into the channel's integer depth with
    /// a fixed scale (`raw * scale` to decode) rather than normalizing to
    /// `[-1, 1]`; this trades resolution for headroom beyond ±1, which the
    /// LOD-distance-based surface extraction relies on. 32/64-bit depths
    /// store IEEE floats bit-for-bit instead.
    pub fn sdf_to_float(&self, raw: u64) -> f32 {
        match self.depth {
            ChannelDepth::Bits8 => (raw as i8 as f32) * SDF_8_BIT_SCALE,
            ChannelDepth::Bits16 => (raw as i16 as f32) * SDF_16_BIT_SCALE,
            ChannelDepth::Bits32 => f32::from_bits(raw as u32),
            ChannelDepth::Bits64 => f64::from_bits(raw) as f32,
        }
    }

    pub fn sdf_from_float(&self, value: f32) -> u64 {
        match self.depth {
            ChannelDepth::Bits8 => {
                let q = (value / SDF_8_BIT_SCALE)
                    .round()
                    .clamp(i8::MIN as f32, i8::MAX as f32) as i8;
                q as u8 as u64
            }
            ChannelDepth::Bits16 => {
                let q = (value / SDF_16_BIT_SCALE)
                    .round()
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                q as u16 as u64
            }
            ChannelDepth::Bits32 => value.to_bits() as u64,
            ChannelDepth::Bits64 => (value as f64).to_bits(),
        }
    }
}

fn read_raw(bytes: &[u8]) -> u64 {
    match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        8 => u64::from_le_bytes(bytes.try_into().unwrap()),
        n => unreachable!("unsupported channel byte width {n}"),
    }
}

fn write_raw(bytes: &mut [u8], value: u64) {
    match bytes.len() {
        1 => bytes[0] = value as u8,
        2 => bytes.copy_from_slice(&(value as u16).to_le_bytes()),
        4 => bytes.copy_from_slice(&(value as u32).to_le_bytes()),
        8 => bytes.copy_from_slice(&value.to_le_bytes()),
        n => unreachable!("unsupported channel byte width {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_fill_then_set_expands_then_recompresses() {
        let mut ch = Channel::new_uniform(ChannelDepth::Bits8, ChannelKind::Generic, 8, 0);
        assert!(ch.is_uniform());
        ch.set(3, 5).unwrap();
        assert!(!ch.is_uniform());
        assert_eq!(ch.get(3), 5);
        assert_eq!(ch.get(0), 0);
        ch.fill(5);
        ch.compress_if_uniform();
        assert!(ch.is_uniform());
        assert_eq!(ch.uniform_value(), Some(5));
    }

    #[test]
    fn sdf_round_trip_within_quantization() {
        let ch = Channel::new_uniform(ChannelDepth::Bits16, ChannelKind::Sdf, 1, 0);
        for v in [-1.0f32, -0.5, 0.0, 0.25, 1.0] {
            let raw = ch.sdf_from_float(v);
            let back = ch.sdf_to_float(raw);
            assert!((back - v).abs() < 0.001, "{v} -> {back}");
        }
    }

    #[test]
    fn sdf_32_bit_is_exact_float_bits() {
        let ch = Channel::new_uniform(ChannelDepth::Bits32, ChannelKind::Sdf, 1, 0);
        let raw = ch.sdf_from_float(0.333_333);
        assert_eq!(ch.sdf_to_float(raw), 0.333_333);
    }
}
