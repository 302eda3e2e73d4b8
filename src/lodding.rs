//! Edit propagation / LOD mipping (spec.md §4.10), grounded directly on
//! `original_source/terrain/variable_lod/voxel_lod_terrain_update_task.cpp`'s
//! `flush_pending_lod_edits`: drains the LOD0 "needs lodding" queue first,
//! then walks LOD pairs `(0,1), (1,2), ...` strictly in ascending order,
//! downscale-copying each modified child into its parent octant and
//! chaining the parent into the next pair's input set.

use std::collections::BTreeSet;

use crate::data::block::DataBlock;
use crate::math::ChunkPos;
use crate::volume_shared::VolumeShared;
use crate::voxel::buffer::MAX_CHANNELS;
use crate::voxel::VoxelBuffer;

/// Flags LOD0 data and mesh blocks intersecting `edit_box.padded(1)` for
/// lodding/remeshing (spec.md §4.10 step 1 — the padding accounts for
/// neighbor-contributed visuals like baked AO).
pub fn post_lod0_edit(volume: &VolumeShared, positions: &[ChunkPos]) {
    let Ok(data_map) = volume.data.lod(0) else {
        return;
    };
    let mesh_map = volume.mesh.lod(0).ok();

    let mut pending = volume.blocks_pending_lodding_lod0.lock();
    for &pos in positions {
        let newly_queued = data_map
            .with_block_mut(pos, |block| {
                let was_queued = block.needs_lodding;
                block.mark_edited();
                block.needs_lodding = true;
                !was_queued
            })
            .unwrap_or_else(|| {
                data_map.insert(pos, {
                    let mut b = DataBlock::empty_marker(0);
                    b.mark_edited();
                    b.needs_lodding = true;
                    b
                });
                true
            });
        if newly_queued {
            pending.push(pos);
        }
        if let Some(mesh_map) = &mesh_map {
            mesh_map.get_or_insert(pos).mark_dirty();
        }
    }
}

/// Drains `blocks_pending_lodding_lod0` and propagates every touched
/// column up through coarser LODs, stopping once a LOD has no generator
/// support for synthesizing a missing parent or the top LOD is reached.
/// Returns every `(position, lod)` pair whose data was rewritten, for the
/// caller to schedule a mesh rebuild against.
pub fn flush_pending_lod_edits(volume: &VolumeShared) -> Vec<(ChunkPos, u8)> {
    let lod0_positions: Vec<ChunkPos> = {
        let mut pending = volume.blocks_pending_lodding_lod0.lock();
        std::mem::take(&mut *pending)
    };
    if lod0_positions.is_empty() {
        return Vec::new();
    }

    if let Ok(map0) = volume.data.lod(0) {
        for &pos in &lod0_positions {
            map0.with_block_mut(pos, |b| b.needs_lodding = false);
        }
    }

    let mut touched: Vec<(ChunkPos, u8)> = lod0_positions.iter().map(|&p| (p, 0u8)).collect();

    // `current` holds the *child* positions actually rewritten at the
    // previous level, not their parents: only those children's octants may
    // be touched at the next level up, so each pass narrows to exactly the
    // parents that received a fresh octant this round.
    let mut current: BTreeSet<ChunkPos> = lod0_positions.iter().copied().collect();
    let max_lod = volume.max_lod();
    let chunk_size = volume.config.chunk_size;

    for dst_lod in 1..=max_lod {
        if current.is_empty() {
            break;
        }
        let src_lod = dst_lod - 1;
        let Ok(src_map) = volume.data.lod(src_lod) else {
            break;
        };
        let Ok(dst_map) = volume.data.lod(dst_lod) else {
            break;
        };
        let dst_mesh_map = volume.mesh.lod(dst_lod).ok();

        let parents: BTreeSet<ChunkPos> = current.iter().map(|p| p.parent()).collect();
        let mut next: BTreeSet<ChunkPos> = BTreeSet::new();
        for &dst_pos in &parents {
            let mut any_child_mipped = false;
            for child_pos in dst_pos.children() {
                if !current.contains(&child_pos) {
                    continue;
                }
                if mip_child_into_parent(volume, &src_map, &dst_map, child_pos, dst_pos, dst_lod, chunk_size) {
                    any_child_mipped = true;
                }
            }
            if any_child_mipped {
                touched.push((dst_pos, dst_lod));
                if let Some(dst_mesh_map) = &dst_mesh_map {
                    dst_mesh_map.get_or_insert(dst_pos).mark_dirty();
                }
                if dst_lod < max_lod {
                    next.insert(dst_pos);
                }
            }
        }
        current = next;
    }

    touched
}

/// Downscale-copies `child_pos`'s buffer into its octant of `dst_pos`'s
/// buffer at `dst_lod`, mutating the parent's existing buffer in place
/// (or synthesizing one via the generator, or blank if none, only when the
/// parent has no buffer yet) rather than rebuilding the whole parent from
/// whichever siblings happen to be resident. Leaves every other octant and
/// any channel the child doesn't declare untouched. Returns `true` if the
/// child contributed data.
fn mip_child_into_parent(
    volume: &VolumeShared,
    src_map: &crate::data::map::DataMap,
    dst_map: &crate::data::map::DataMap,
    child_pos: ChunkPos,
    dst_pos: ChunkPos,
    dst_lod: u8,
    chunk_size: u32,
) -> bool {
    let Some(child_buffer) = src_map.with_block(child_pos, |b| b.voxels.clone()).flatten() else {
        return false;
    };

    let has_buffer = dst_map.with_block(dst_pos, |b| b.voxels.is_some()).unwrap_or(false);
    if !has_buffer {
        let mut buffer = VoxelBuffer::create(glam::UVec3::splat(chunk_size)).expect("valid chunk size");
        if let Some(generator) = volume.deps.streaming().generator.as_ref() {
            let origin = dst_pos.origin_in_voxels(dst_lod, chunk_size);
            generator.generate_block(&mut buffer, origin, dst_lod);
        }
        let shared = std::sync::Arc::new(parking_lot::RwLock::new(buffer));
        let updated = dst_map.with_block_mut(dst_pos, |b| b.voxels = Some(shared.clone())).is_some();
        if !updated {
            let mut block = DataBlock::empty_marker(dst_lod);
            block.voxels = Some(shared);
            dst_map.insert(dst_pos, block);
        }
    }

    let Some(dst_buffer) = dst_map.with_block(dst_pos, |b| b.voxels.clone()).flatten() else {
        return false;
    };

    let half = chunk_size / 2;
    let octant = child_pos.octant_in_parent();
    let dst_min = glam::UVec3::new(
        half * (octant as u32 & 1),
        half * ((octant as u32 >> 1) & 1),
        half * ((octant as u32 >> 2) & 1),
    );

    {
        let child_buffer = child_buffer.read();
        let mut dst_buffer = dst_buffer.write();
        for channel in 0..MAX_CHANNELS {
            let Ok(child_channel) = child_buffer.channel(channel) else {
                continue;
            };
            if dst_buffer.channel(channel).is_err() {
                dst_buffer
                    .set_channel_depth(channel, child_channel.depth(), child_channel.kind(), 0)
                    .expect("channel index in range");
            }
            child_buffer
                .downscale_to(&mut dst_buffer, glam::UVec3::ZERO, glam::UVec3::splat(half), dst_min, channel)
                .expect("matching depths, same channel just declared");
        }
        dst_buffer.compress_uniform_channels();
    }

    dst_map.with_block_mut(dst_pos, |block| block.mark_edited());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeConfig;
    use crate::dependency::{DependencyRegistry, MeshingDependency, StreamingDependency};
    use crate::output::{BlockDataOutput, BlockMeshOutput, VolumeCallbacks};
    use crate::tasks::pool::TaskPool;
    use crate::voxel::buffer::CHANNEL_SDF;
    use crate::voxel::channel::{ChannelDepth, ChannelKind};
    use std::sync::Arc;

    struct NoopCallbacks;
    impl VolumeCallbacks for NoopCallbacks {
        fn on_data_output(&self, _output: BlockDataOutput) {}
        fn on_mesh_output(&self, _output: BlockMeshOutput) {}
    }

    fn make_volume() -> Arc<VolumeShared> {
        let registry = DependencyRegistry::new(StreamingDependency::new(None, None), MeshingDependency::new(None));
        let mut config = VolumeConfig::default();
        config.lod_count = 2;
        Arc::new(VolumeShared::new(
            config,
            Arc::new(NoopCallbacks),
            Arc::new(TaskPool::new(1)),
            registry,
        ))
    }

    fn make_buffer(value: u64) -> VoxelBuffer {
        let mut buf = VoxelBuffer::create(glam::UVec3::splat(16)).unwrap();
        buf.set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0).unwrap();
        buf.fill(value, CHANNEL_SDF).unwrap();
        buf
    }

    #[test]
    fn post_edit_queues_lod0_block_once() {
        let volume = make_volume();
        volume.data.lod(0).unwrap().insert(ChunkPos::ZERO, DataBlock::with_buffer(make_buffer(1), 0));
        post_lod0_edit(&volume, &[ChunkPos::ZERO]);
        post_lod0_edit(&volume, &[ChunkPos::ZERO]);
        assert_eq!(volume.blocks_pending_lodding_lod0.lock().len(), 1);
    }

    #[test]
    fn flush_propagates_into_parent_lod() {
        let volume = make_volume();
        volume.data.lod(0).unwrap().insert(ChunkPos::ZERO, DataBlock::with_buffer(make_buffer(5), 0));
        post_lod0_edit(&volume, &[ChunkPos::ZERO]);

        let touched = flush_pending_lod_edits(&volume);
        assert!(touched.contains(&(ChunkPos::ZERO, 0)));
        assert!(touched.contains(&(ChunkPos::ZERO, 1)));
        assert!(volume.data.lod(1).unwrap().contains(ChunkPos::ZERO));
    }

    #[test]
    fn flush_with_nothing_pending_is_a_no_op() {
        let volume = make_volume();
        assert!(flush_pending_lod_edits(&volume).is_empty());
    }
}
