pub mod block;
pub mod lod_map;
pub mod map;

pub use block::{MeshBlock, MeshState};
pub use lod_map::MeshLodMap;
pub use map::MeshMap;
