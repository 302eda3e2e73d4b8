pub mod block;
pub mod lod_map;
pub mod map;
pub mod modifiers;
pub mod spatial_lock;

pub use block::{DataBlock, RefCount, SharedVoxelBuffer};
pub use lod_map::DataLodMap;
pub use map::{DataMap, MapError};
