pub mod buffer;
pub mod channel;
pub mod metadata;

pub use buffer::VoxelBuffer;
pub use channel::{ChannelDepth, ChannelKind};
pub use metadata::{BlockMetadata, Variant};
