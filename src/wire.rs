//! Chunk wire format (spec.md §6): the byte layout used by bulk save and
//! the optional multiplayer area-diff synchronizer.
//!
//! Compression follows the teacher's `persistence::compression::Compressor`
//! shape (`CompressionType`, `compress`/`decompress` per algorithm) but
//! only keeps the two algorithms the crate's dependency stack still
//! carries (`zstd`, `lz4_flex`); `Compressor::None`/`Gzip`/`Zlib` from the
//! teacher have no matching dependency here and are dropped.

use std::io::Read;

use glam::UVec3;

use crate::voxel::buffer::{BufferError, VoxelBuffer, MAX_CHANNELS};
use crate::voxel::channel::{ChannelDepth, ChannelKind};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown compression kind byte {0}")]
    UnknownCompressionKind(u8),
    #[error("unknown channel depth byte {0}")]
    UnknownChannelDepth(u8),
    #[error("unknown channel kind byte {0}")]
    UnknownChannelKind(u8),
    #[error("compression codec error: {0}")]
    Codec(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionKind {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl CompressionKind {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Zstd),
            2 => Ok(CompressionKind::Lz4),
            other => Err(WireError::UnknownCompressionKind(other)),
        }
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>, WireError> {
        match self {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Zstd => {
                zstd::stream::encode_all(data, 0).map_err(|e| WireError::Codec(e.to_string()))
            }
            CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    fn decompress(self, data: &[u8]) -> Result<Vec<u8>, WireError> {
        match self {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Zstd => {
                let mut out = Vec::new();
                zstd::stream::read::Decoder::new(data)
                    .and_then(|mut d| d.read_to_end(&mut out).map(|_| ()))
                    .map_err(|e| WireError::Codec(e.to_string()))?;
                Ok(out)
            }
            CompressionKind::Lz4 => {
                lz4_flex::decompress_size_prepended(data).map_err(|e| WireError::Codec(e.to_string()))
            }
        }
    }
}

fn depth_byte(d: ChannelDepth) -> u8 {
    match d {
        ChannelDepth::Bits8 => 0,
        ChannelDepth::Bits16 => 1,
        ChannelDepth::Bits32 => 2,
        ChannelDepth::Bits64 => 3,
    }
}

fn depth_from_byte(b: u8) -> Result<ChannelDepth, WireError> {
    match b {
        0 => Ok(ChannelDepth::Bits8),
        1 => Ok(ChannelDepth::Bits16),
        2 => Ok(ChannelDepth::Bits32),
        3 => Ok(ChannelDepth::Bits64),
        other => Err(WireError::UnknownChannelDepth(other)),
    }
}

fn kind_byte(k: ChannelKind) -> u8 {
    match k {
        ChannelKind::Generic => 0,
        ChannelKind::Sdf => 1,
        ChannelKind::IndicesWeights => 2,
    }
}

fn kind_from_byte(b: u8) -> Result<ChannelKind, WireError> {
    match b {
        0 => Ok(ChannelKind::Generic),
        1 => Ok(ChannelKind::Sdf),
        2 => Ok(ChannelKind::IndicesWeights),
        other => Err(WireError::UnknownChannelKind(other)),
    }
}

/// Uncompressed header + channel dump: dimensions, then per declared
/// channel `{present, depth, kind, uniform-or-bytes}`.
fn serialize_uncompressed(buf: &VoxelBuffer) -> Vec<u8> {
    let size = buf.size();
    let mut out = Vec::new();
    out.extend_from_slice(&(size.x as u16).to_le_bytes());
    out.extend_from_slice(&(size.y as u16).to_le_bytes());
    out.extend_from_slice(&(size.z as u16).to_le_bytes());
    for channel in 0..MAX_CHANNELS {
        match buf.channel(channel) {
            Err(_) => out.push(0), // not present
            Ok(ch) => {
                out.push(1);
                out.push(depth_byte(ch.depth()));
                out.push(kind_byte(ch.kind()));
                match ch.uniform_value() {
                    Some(v) => {
                        out.push(0);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    None => {
                        out.push(1);
                        let bytes = ch.raw_bytes().expect("expanded channel has raw bytes");
                        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                        out.extend_from_slice(bytes);
                    }
                }
            }
        }
    }
    out
}

fn deserialize_uncompressed(bytes: &[u8]) -> Result<VoxelBuffer, WireError> {
    let need = 6;
    if bytes.len() < need {
        return Err(WireError::Truncated { need, have: bytes.len() });
    }
    let sx = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
    let sy = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
    let sz = u16::from_le_bytes([bytes[4], bytes[5]]) as u32;
    let mut buf = VoxelBuffer::create(UVec3::new(sx, sy, sz))?;
    let mut cursor = 6usize;
    for channel in 0..MAX_CHANNELS {
        if cursor >= bytes.len() {
            return Err(WireError::Truncated { need: cursor + 1, have: bytes.len() });
        }
        let present = bytes[cursor];
        cursor += 1;
        if present == 0 {
            continue;
        }
        if cursor + 3 > bytes.len() {
            return Err(WireError::Truncated { need: cursor + 3, have: bytes.len() });
        }
        let depth = depth_from_byte(bytes[cursor])?;
        let kind = kind_from_byte(bytes[cursor + 1])?;
        let is_expanded = bytes[cursor + 2];
        cursor += 3;
        if is_expanded == 0 {
            if cursor + 8 > bytes.len() {
                return Err(WireError::Truncated { need: cursor + 8, have: bytes.len() });
            }
            let value = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            buf.set_channel_depth(channel, depth, kind, value)?;
        } else {
            if cursor + 4 > bytes.len() {
                return Err(WireError::Truncated { need: cursor + 4, have: bytes.len() });
            }
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                return Err(WireError::Truncated { need: cursor + len, have: bytes.len() });
            }
            buf.set_channel_depth(channel, depth, kind, 0)?;
            buf.decompress_channel(channel)?;
            for (i, chunk) in bytes[cursor..cursor + len].chunks_exact(depth.byte_size()).enumerate() {
                let raw = match chunk.len() {
                    1 => chunk[0] as u64,
                    2 => u16::from_le_bytes([chunk[0], chunk[1]]) as u64,
                    4 => u32::from_le_bytes(chunk.try_into().unwrap()) as u64,
                    8 => u64::from_le_bytes(chunk.try_into().unwrap()),
                    _ => unreachable!(),
                };
                let z = i as u32 / (sx * sy);
                let rem = i as u32 % (sx * sy);
                let x = rem / sy;
                let y = rem % sy;
                buf.set_voxel(UVec3::new(x, y, z), raw, channel)?;
            }
            cursor += len;
        }
    }
    Ok(buf)
}

pub fn compress_and_serialize(buf: &VoxelBuffer, kind: CompressionKind) -> Result<Vec<u8>, WireError> {
    let raw = serialize_uncompressed(buf);
    let mut out = vec![kind as u8];
    out.extend(kind.compress(&raw)?);
    Ok(out)
}

pub fn decompress_and_deserialize(bytes: &[u8]) -> Result<VoxelBuffer, WireError> {
    if bytes.is_empty() {
        return Err(WireError::Truncated { need: 1, have: 0 });
    }
    let kind = CompressionKind::from_byte(bytes[0])?;
    let raw = kind.decompress(&bytes[1..])?;
    deserialize_uncompressed(&raw)
}

/// One entry of a block-batch wire message: `i16 x,y,z`, `u16 size`, then
/// `size` bytes of `voxels_compressed`.
pub struct BlockRecord {
    pub position: glam::IVec3,
    pub voxels_compressed: Vec<u8>,
}

pub fn encode_block_batch(records: &[BlockRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        out.extend_from_slice(&(record.position.x as i16).to_le_bytes());
        out.extend_from_slice(&(record.position.y as i16).to_le_bytes());
        out.extend_from_slice(&(record.position.z as i16).to_le_bytes());
        out.extend_from_slice(&(record.voxels_compressed.len() as u16).to_le_bytes());
        out.extend_from_slice(&record.voxels_compressed);
    }
    out
}

pub fn decode_block_batch(bytes: &[u8]) -> Result<Vec<BlockRecord>, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::Truncated { need: 4, have: bytes.len() });
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut cursor = 4usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor + 8 > bytes.len() {
            return Err(WireError::Truncated { need: cursor + 8, have: bytes.len() });
        }
        let x = i16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]) as i32;
        let y = i16::from_le_bytes([bytes[cursor + 2], bytes[cursor + 3]]) as i32;
        let z = i16::from_le_bytes([bytes[cursor + 4], bytes[cursor + 5]]) as i32;
        let size = u16::from_le_bytes([bytes[cursor + 6], bytes[cursor + 7]]) as usize;
        cursor += 8;
        if cursor + size > bytes.len() {
            return Err(WireError::Truncated { need: cursor + size, have: bytes.len() });
        }
        out.push(BlockRecord {
            position: glam::IVec3::new(x, y, z),
            voxels_compressed: bytes[cursor..cursor + size].to_vec(),
        });
        cursor += size;
    }
    Ok(out)
}

/// Area wire message: `i32 x,y,z`, `u32 size`, then `size` bytes. Used by
/// the multiplayer area-diff pair `notify_area_edited`/`receive_area`.
pub struct AreaRecord {
    pub position: glam::IVec3,
    pub voxels_compressed: Vec<u8>,
}

pub fn encode_area(record: &AreaRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&record.position.x.to_le_bytes());
    out.extend_from_slice(&record.position.y.to_le_bytes());
    out.extend_from_slice(&record.position.z.to_le_bytes());
    out.extend_from_slice(&(record.voxels_compressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&record.voxels_compressed);
    out
}

pub fn decode_area(bytes: &[u8]) -> Result<AreaRecord, WireError> {
    if bytes.len() < 16 {
        return Err(WireError::Truncated { need: 16, have: bytes.len() });
    }
    let x = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let y = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let z = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let size = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    if bytes.len() < 16 + size {
        return Err(WireError::Truncated { need: 16 + size, have: bytes.len() });
    }
    Ok(AreaRecord {
        position: glam::IVec3::new(x, y, z),
        voxels_compressed: bytes[16..16 + size].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::buffer::CHANNEL_SDF;

    fn sample_buffer() -> VoxelBuffer {
        let mut buf = VoxelBuffer::create(UVec3::splat(4)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
            .unwrap();
        buf.set_voxel(UVec3::new(1, 2, 3), 123, CHANNEL_SDF).unwrap();
        buf
    }

    #[test]
    fn serialize_and_compress_then_decompress_round_trips_zstd() {
        let buf = sample_buffer();
        let wire = compress_and_serialize(&buf, CompressionKind::Zstd).unwrap();
        let back = decompress_and_deserialize(&wire).unwrap();
        assert_eq!(back.size(), buf.size());
        assert_eq!(
            back.get_voxel(UVec3::new(1, 2, 3), CHANNEL_SDF).unwrap(),
            buf.get_voxel(UVec3::new(1, 2, 3), CHANNEL_SDF).unwrap()
        );
    }

    #[test]
    fn serialize_and_compress_then_decompress_round_trips_lz4() {
        let buf = sample_buffer();
        let wire = compress_and_serialize(&buf, CompressionKind::Lz4).unwrap();
        let back = decompress_and_deserialize(&wire).unwrap();
        assert_eq!(
            back.get_voxel(UVec3::new(1, 2, 3), CHANNEL_SDF).unwrap(),
            buf.get_voxel(UVec3::new(1, 2, 3), CHANNEL_SDF).unwrap()
        );
    }

    #[test]
    fn block_batch_round_trips() {
        let records = vec![
            BlockRecord {
                position: glam::IVec3::new(1, -2, 3),
                voxels_compressed: vec![1, 2, 3, 4],
            },
            BlockRecord {
                position: glam::IVec3::new(0, 0, 0),
                voxels_compressed: vec![],
            },
        ];
        let bytes = encode_block_batch(&records);
        let decoded = decode_block_batch(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].position, glam::IVec3::new(1, -2, 3));
        assert_eq!(decoded[0].voxels_compressed, vec![1, 2, 3, 4]);
    }

    #[test]
    fn truncated_area_message_is_an_error() {
        assert!(decode_area(&[0u8; 4]).is_err());
    }
}
