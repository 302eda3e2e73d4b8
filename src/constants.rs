//! Single source of truth for tunable constants, following the teacher's
//! root-level `constants.rs` (`pub mod core { ... }` grouping by concern).

pub mod core {
    /// Default edge length of a data chunk, in voxels, per axis.
    pub const DEFAULT_CHUNK_SIZE: u32 = 16;

    /// Maximum number of LODs a `DataLodMap`/`MeshLodMap` may hold
    /// (spec.md §3: LOD index fits in a `u8` used as an array index up to 32).
    pub const MAX_LOD_COUNT: u8 = 32;

    /// Default number of LODs when a volume doesn't specify one.
    pub const DEFAULT_LOD_COUNT: u8 = 8;
}

pub mod priority {
    /// `TASK_PRIORITY_BAND3_DEFAULT` from `original_source/engine/priority_dependency.cpp`.
    pub const BAND3_DEFAULT: u8 = 0;

    /// `TaskPriority::BAND_MAX` from `original_source/util/tasks/task_priority.h`.
    pub const BAND_MAX: u8 = 255;

    /// Extra right-shift applied to distance before clamping into band0,
    /// matching `original_source/engine/priority_dependency.cpp`'s
    /// `arithmetic_rshift(int(distance), 4 + lod_index)`.
    pub const BAND0_DISTANCE_SHIFT_BASE: u32 = 4;
}

pub mod quantization {
    /// `VoxelConstants::QUANTIZED_SDF_8_BITS_SCALE` — decode is `raw * scale`,
    /// encode is `value / scale`, giving SDF values headroom beyond ±1 for
    /// LOD purposes rather than normalizing to the channel's integer range.
    pub const SDF_8_BIT_SCALE: f32 = 0.1;
    /// `VoxelConstants::QUANTIZED_SDF_16_BITS_SCALE`, same decode/encode
    /// direction as [`SDF_8_BIT_SCALE`].
    pub const SDF_16_BIT_SCALE: f32 = 0.002;
}

pub mod tasks {
    /// Default per-frame main-thread drain budget, matching the teacher's
    /// `thread_pool/thread_pool.rs` stack-size-class tuning philosophy of
    /// picking a conservative default that's overridable via config.
    pub const DEFAULT_MAIN_THREAD_BUDGET_MICROS: u64 = 2_000;

    /// Interval at which the task pool re-walks its pending queue to
    /// refresh stale priorities (`original_source`'s octree streaming
    /// update runs roughly this often).
    pub const DEFAULT_REPRIORITIZE_INTERVAL_MS: u64 = 200;

    /// Default thread-stack size for pool worker threads, matching
    /// `thread_pool/thread_pool.rs`'s `ThreadPoolConfig::default`.
    pub const DEFAULT_WORKER_STACK_SIZE_BYTES: usize = 2 * 1024 * 1024;
}

pub mod streaming {
    /// Default collision-mesh rebuild throttle, milliseconds (spec.md §4.12).
    pub const DEFAULT_COLLISION_UPDATE_THROTTLE_MS: u64 = 200;

    /// Default padding (in chunks) added around a viewer's data sliding
    /// box beyond its mesh sliding box, so meshing never needs to wait on
    /// streaming to cross a chunk boundary (spec.md §4.6/§4.7).
    pub const DEFAULT_DATA_MARGIN_CHUNKS: i32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lod_count_within_max() {
        assert!(core::DEFAULT_LOD_COUNT <= core::MAX_LOD_COUNT);
    }
}
