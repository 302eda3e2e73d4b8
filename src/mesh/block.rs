//! `MeshBlock` and its state machine (spec.md §3/§4.8).

use std::sync::atomic::{AtomicU8, AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::interfaces::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeshState {
    NeverUpdated = 0,
    NeedUpdate = 1,
    UpdateNotSent = 2,
    UpdateSent = 3,
    UpToDate = 4,
}

impl MeshState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MeshState::NeverUpdated,
            1 => MeshState::NeedUpdate,
            2 => MeshState::UpdateNotSent,
            3 => MeshState::UpdateSent,
            4 => MeshState::UpToDate,
            other => unreachable!("invalid mesh state byte {other}"),
        }
    }
}

/// Factor between mesh-block size and data-block size: only 1 or 2 is
/// supported (16/16 or 16/32 in the original's terms); everything else
/// is a programmer error, not a runtime condition (spec.md §9).
pub fn assert_valid_ratio(mesh_block_size: u32, data_block_size: u32) {
    debug_assert!(
        mesh_block_size == data_block_size || mesh_block_size == data_block_size * 2,
        "mesh_block_size ({mesh_block_size}) must equal data_block_size ({data_block_size}) or 2x it"
    );
}

pub struct MeshBlock {
    state: AtomicU8,
    pub active: AtomicBool,
    /// 6-bit transition mask, one bit per cube side (spec.md §4.9).
    pub transition_mask: AtomicU8,
    /// Opaque identity of the currently displayed mesh (host-defined);
    /// `None` until the first successful mesh result is applied.
    pub mesh_identity: parking_lot::Mutex<Option<u64>>,
    pub fade: AtomicU8,
    /// Most recent collider surface awaiting a throttled rebuild
    /// (spec.md §4.12 step 2); overwritten by newer results while the
    /// throttle window hasn't elapsed, so only the latest survives.
    pending_collision: parking_lot::Mutex<Option<Surface>>,
    last_collider_emit: parking_lot::Mutex<Option<Instant>>,
}

impl Default for MeshBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshBlock {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(MeshState::NeverUpdated as u8),
            active: AtomicBool::new(false),
            transition_mask: AtomicU8::new(0),
            mesh_identity: parking_lot::Mutex::new(None),
            fade: AtomicU8::new(0),
            pending_collision: parking_lot::Mutex::new(None),
            last_collider_emit: parking_lot::Mutex::new(None),
        }
    }

    /// Replaces the most recently computed collider surface, discarding
    /// whatever was still waiting for its throttle window.
    pub fn stash_collision(&self, surface: Option<Surface>) {
        if surface.is_some() {
            *self.pending_collision.lock() = surface;
        }
    }

    /// Takes the pending collider surface if one is waiting and `throttle`
    /// has elapsed since the last emit, advancing the throttle clock.
    pub fn take_due_collision(&self, throttle: Duration) -> Option<Surface> {
        let mut pending = self.pending_collision.lock();
        if pending.is_none() {
            return None;
        }
        let mut last = self.last_collider_emit.lock();
        if let Some(last_emit) = *last {
            if last_emit.elapsed() < throttle {
                return None;
            }
        }
        *last = Some(Instant::now());
        pending.take()
    }

    pub fn state(&self) -> MeshState {
        MeshState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: MeshState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    /// Returns `true` if the position should be appended to
    /// `blocks_pending_update` (the block was active and newly queued).
    pub fn schedule_mesh_update(&self, active: bool) -> bool {
        if self.state() == MeshState::UpdateNotSent {
            return false;
        }
        if active {
            self.set_state(MeshState::UpdateNotSent);
            true
        } else {
            self.set_state(MeshState::NeedUpdate);
            false
        }
    }

    /// Called when the pool dispatches a task for this block.
    pub fn mark_dispatched(&self) {
        let _ = self.state.compare_exchange(
            MeshState::UpdateNotSent as u8,
            MeshState::UpdateSent as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Called when a mesh result for this block arrives. Returns `true` if
    /// the block is now up to date; `false` if an edit raced the result and
    /// another update is still needed (caller should re-schedule).
    pub fn apply_result(&self) -> bool {
        self.state
            .compare_exchange(
                MeshState::UpdateSent as u8,
                MeshState::UpToDate as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Any edit affecting this block moves it back to `NEED_UPDATE`
    /// regardless of its current state (spec.md §4.8).
    pub fn mark_dirty(&self) {
        self.set_state(MeshState::NeedUpdate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_while_active_queues_update_not_sent() {
        let block = MeshBlock::new();
        let queued = block.schedule_mesh_update(true);
        assert!(queued);
        assert_eq!(block.state(), MeshState::UpdateNotSent);
    }

    #[test]
    fn schedule_while_inactive_only_marks_need_update() {
        let block = MeshBlock::new();
        let queued = block.schedule_mesh_update(false);
        assert!(!queued);
        assert_eq!(block.state(), MeshState::NeedUpdate);
    }

    #[test]
    fn result_after_edit_reports_not_up_to_date() {
        let block = MeshBlock::new();
        block.schedule_mesh_update(true);
        block.mark_dispatched();
        block.mark_dirty(); // edit raced the in-flight task
        let became_up_to_date = block.apply_result();
        assert!(!became_up_to_date);
        assert_eq!(block.state(), MeshState::NeedUpdate);
    }

    #[test]
    fn normal_round_trip_reaches_up_to_date() {
        let block = MeshBlock::new();
        block.schedule_mesh_update(true);
        block.mark_dispatched();
        assert!(block.apply_result());
        assert_eq!(block.state(), MeshState::UpToDate);
    }
}
