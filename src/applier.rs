//! Main-thread applier (spec.md §4.12), grounded on
//! `original_source/terrain/variable_lod/voxel_lod_terrain.cpp`'s
//! per-frame `_process` method: drains completed tasks under a time
//! budget, throttles collider rebuilds, advances mesh fade, republishes
//! the viewer snapshot when it changed, and kicks the update task.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::tasks::DEFAULT_FADE_STEP_PER_TICK;
use crate::output::ColliderUpdateOutput;
use crate::update_task::UpdateTask;
use crate::viewer::Viewer;
use crate::volume_shared::VolumeShared;

pub struct MainThreadApplier {
    update_task: UpdateTask,
    last_viewer_count: usize,
}

impl MainThreadApplier {
    pub fn new(volume: &VolumeShared) -> Self {
        Self {
            update_task: UpdateTask::new(volume),
            last_viewer_count: usize::MAX,
        }
    }

    /// Runs one frame's worth of applier work. `viewers` is the host's
    /// current registered-viewer set for this volume; `drain_budget`
    /// bounds step 1 (spec.md §4.12).
    pub fn process(&mut self, volume: &Arc<VolumeShared>, viewers: &[&Viewer], drain_budget: Duration) {
        volume.pool.drain_completed(drain_budget);
        volume.pool.maybe_reprioritize();

        self.process_collider_updates(volume);
        self.process_fading(volume);
        self.refresh_viewer_snapshot(volume, viewers);

        let primary = viewers.first().map(|v| v.position()).unwrap_or(glam::Vec3::ZERO);
        if self.update_task.try_begin() {
            self.update_task.run(volume, primary);
            self.update_task.finish();
        }
    }

    fn process_collider_updates(&self, volume: &VolumeShared) {
        let throttle = Duration::from_millis(volume.config.collision_update_throttle_ms);
        for lod in 0..volume.mesh.lod_count() {
            let Ok(mesh_map) = volume.mesh.lod(lod) else {
                continue;
            };
            for (pos, block) in mesh_map.entries() {
                if let Some(collision) = block.take_due_collision(throttle) {
                    volume.callbacks.on_collider_update(ColliderUpdateOutput {
                        position: pos,
                        lod,
                        collision,
                    });
                }
            }
        }
    }

    /// Steps every mesh block's 0..255 fade counter one tick toward full
    /// (spec.md §4.12 step 3 — alpha cross-fade between LODs on
    /// activate/deactivate). Inactive blocks fade down, active ones fade up.
    fn process_fading(&self, volume: &VolumeShared) {
        for lod in 0..volume.mesh.lod_count() {
            let Ok(mesh_map) = volume.mesh.lod(lod) else {
                continue;
            };
            for (_, block) in mesh_map.entries() {
                let active = block.active.load(Ordering::SeqCst);
                let current = block.fade.load(Ordering::Relaxed);
                let next = if active {
                    current.saturating_add(DEFAULT_FADE_STEP_PER_TICK)
                } else {
                    current.saturating_sub(DEFAULT_FADE_STEP_PER_TICK)
                };
                if next != current {
                    block.fade.store(next, Ordering::Relaxed);
                }
            }
        }
    }

    fn refresh_viewer_snapshot(&mut self, volume: &VolumeShared, viewers: &[&Viewer]) {
        if viewers.len() == self.last_viewer_count {
            return;
        }
        self.last_viewer_count = viewers.len();

        let mut highest_view_distance = 0.0f32;
        let mut requires_collisions = false;
        let positions: Vec<glam::Vec3> = viewers
            .iter()
            .map(|v| {
                highest_view_distance = highest_view_distance.max(v.view_distance());
                requires_collisions |= v.flags().requires_collisions;
                v.position()
            })
            .collect();

        volume.publish_viewers(Arc::new(crate::priority::ViewersSnapshot {
            viewers: positions,
            highest_view_distance,
        }));
        volume.set_collision_requested(requires_collisions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeConfig;
    use crate::dependency::{DependencyRegistry, MeshingDependency, StreamingDependency};
    use crate::output::{BlockDataOutput, BlockMeshOutput, VolumeCallbacks};
    use crate::tasks::pool::TaskPool;
    use crate::viewer::ViewerFlags;

    struct NoopCallbacks;
    impl VolumeCallbacks for NoopCallbacks {
        fn on_data_output(&self, _output: BlockDataOutput) {}
        fn on_mesh_output(&self, _output: BlockMeshOutput) {}
    }

    fn make_volume() -> Arc<VolumeShared> {
        let registry = DependencyRegistry::new(StreamingDependency::new(None, None), MeshingDependency::new(None));
        Arc::new(VolumeShared::new(
            VolumeConfig::default(),
            Arc::new(NoopCallbacks),
            Arc::new(TaskPool::new(1)),
            registry,
        ))
    }

    #[test]
    fn refreshing_with_same_viewer_count_is_a_no_op() {
        let volume = make_volume();
        let mut applier = MainThreadApplier::new(&volume);
        let v = Viewer::new(glam::Vec3::ZERO, 128.0, ViewerFlags::default());
        let viewers = [&v];
        applier.process(&volume, &viewers, Duration::from_millis(5));
        let first = volume.current_viewers();
        applier.process(&volume, &viewers, Duration::from_millis(5));
        let second = volume.current_viewers();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn collision_requested_tracks_viewer_flags() {
        let volume = make_volume();
        let mut applier = MainThreadApplier::new(&volume);
        let mut flags = ViewerFlags::default();
        flags.requires_collisions = true;
        let v = Viewer::new(glam::Vec3::ZERO, 128.0, flags);
        let viewers = [&v];
        applier.process(&volume, &viewers, Duration::from_millis(5));
        assert!(volume.collision_requested());
    }
}
