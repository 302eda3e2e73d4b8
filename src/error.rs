//! Crate-level error type.
//!
//! Mirrors the teacher's `world/management/world_manager.rs::WorldError`
//! shape (a flat `thiserror` enum with named fields per variant) rather
//! than a tree of nested error types. Subsystem modules that need their
//! own local error (e.g. `voxel::BufferError`) convert into `CoreError`
//! with `#[from]` at the point they cross into the public API, the same
//! way the teacher's `streaming::error::StreamingResult` is a type alias
//! over the engine-wide error rather than its own hierarchy.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("chunk_size must be a power of two, got {0}")]
    InvalidChunkSize(u32),

    #[error("lod_count must be in 1..=32, got {0}")]
    InvalidLodCount(u8),

    #[error("channel depth must be one of 8/16/32/64 bits, got {0}")]
    InvalidChannelDepth(u8),

    #[error("mesh_block_size must be a multiple of chunk_size, got mesh={mesh} chunk={chunk}")]
    InvalidMeshBlockSize { mesh: u32, chunk: u32 },

    #[error("unknown volume id {0:?}")]
    UnknownVolume(crate::slotmap::VolumeId),

    #[error("unknown viewer id {0:?}")]
    UnknownViewer(crate::slotmap::ViewerId),

    #[error("lod index {lod} out of range (lod_count={lod_count})")]
    LodOutOfRange { lod: u8, lod_count: u8 },

    #[error("voxel buffer error: {0}")]
    Buffer(#[from] crate::voxel::buffer::BufferError),

    #[error("data map error: {0}")]
    Map(#[from] crate::data::map::MapError),

    #[error("wire format error: {0}")]
    Wire(#[from] crate::wire::WireError),

    #[error("stream backend error: {0}")]
    Stream(#[source] anyhow::Error),
}
