//! `Viewer` record (spec.md §3): position is updated frequently and may
//! be read without locks by priority evaluators — stale reads are
//! tolerated, so position is a small atomic-bits cell rather than behind
//! a `RwLock`.

use std::sync::atomic::{AtomicU32, AtomicBool, Ordering};

pub use crate::slotmap::ViewerId;

#[derive(Debug, Clone, Copy, Default)]
pub struct ViewerFlags {
    pub requires_meshes: bool,
    pub requires_collisions: bool,
    pub requires_notifications: bool,
}

/// Lock-free 3-float position cell. Reads may race a concurrent write and
/// observe a torn value across the three components; spec.md explicitly
/// tolerates this ("stale reads are tolerated") since it only affects
/// task priority, which self-corrects within one re-evaluation interval.
struct AtomicVec3 {
    x: AtomicU32,
    y: AtomicU32,
    z: AtomicU32,
}

impl AtomicVec3 {
    fn new(v: glam::Vec3) -> Self {
        Self {
            x: AtomicU32::new(v.x.to_bits()),
            y: AtomicU32::new(v.y.to_bits()),
            z: AtomicU32::new(v.z.to_bits()),
        }
    }

    fn load(&self) -> glam::Vec3 {
        glam::Vec3::new(
            f32::from_bits(self.x.load(Ordering::Relaxed)),
            f32::from_bits(self.y.load(Ordering::Relaxed)),
            f32::from_bits(self.z.load(Ordering::Relaxed)),
        )
    }

    fn store(&self, v: glam::Vec3) {
        self.x.store(v.x.to_bits(), Ordering::Relaxed);
        self.y.store(v.y.to_bits(), Ordering::Relaxed);
        self.z.store(v.z.to_bits(), Ordering::Relaxed);
    }
}

pub struct Viewer {
    position: AtomicVec3,
    view_distance: AtomicU32,
    requires_meshes: AtomicBool,
    requires_collisions: AtomicBool,
    requires_notifications: AtomicBool,
}

impl Viewer {
    pub fn new(position: glam::Vec3, view_distance: f32, flags: ViewerFlags) -> Self {
        Self {
            position: AtomicVec3::new(position),
            view_distance: AtomicU32::new(view_distance.to_bits()),
            requires_meshes: AtomicBool::new(flags.requires_meshes),
            requires_collisions: AtomicBool::new(flags.requires_collisions),
            requires_notifications: AtomicBool::new(flags.requires_notifications),
        }
    }

    pub fn position(&self) -> glam::Vec3 {
        self.position.load()
    }

    pub fn set_position(&self, position: glam::Vec3) {
        self.position.store(position);
    }

    pub fn view_distance(&self) -> f32 {
        f32::from_bits(self.view_distance.load(Ordering::Relaxed))
    }

    pub fn set_view_distance(&self, distance: f32) {
        self.view_distance.store(distance.to_bits(), Ordering::Relaxed);
    }

    pub fn flags(&self) -> ViewerFlags {
        ViewerFlags {
            requires_meshes: self.requires_meshes.load(Ordering::Relaxed),
            requires_collisions: self.requires_collisions.load(Ordering::Relaxed),
            requires_notifications: self.requires_notifications.load(Ordering::Relaxed),
        }
    }

    pub fn set_flags(&self, flags: ViewerFlags) {
        self.requires_meshes.store(flags.requires_meshes, Ordering::Relaxed);
        self.requires_collisions
            .store(flags.requires_collisions, Ordering::Relaxed);
        self.requires_notifications
            .store(flags.requires_notifications, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips() {
        let v = Viewer::new(glam::Vec3::ZERO, 256.0, ViewerFlags::default());
        v.set_position(glam::Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(v.position(), glam::Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn flags_round_trip() {
        let v = Viewer::new(glam::Vec3::ZERO, 256.0, ViewerFlags::default());
        let flags = ViewerFlags {
            requires_meshes: true,
            requires_collisions: false,
            requires_notifications: true,
        };
        v.set_flags(flags);
        let read = v.flags();
        assert!(read.requires_meshes);
        assert!(!read.requires_collisions);
        assert!(read.requires_notifications);
    }
}
