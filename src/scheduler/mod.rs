//! The two-tier dependency-aware scheduler.
//!
//! `PipelineShared` is the one hub every pipeline thread holds an `Arc` to:
//! liveness, enablement flags, the frame mailboxes, the six stage slots, the
//! completion barrier, the body history, the in-flight result and the output
//! bus. The two manager loops live in `managers`, the worker loops in
//! `workers`.
//!
//! Lock ordering is fixed and encoded in two helpers: `schedule_stage`
//! acquires slot before barrier, `finish_stage` acquires barrier before
//! result. No other site takes two of these locks at once.

mod managers;
mod workers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::history::BodyHistory;
use crate::result::{FrameResult, OutputBus, ResultCollector};
use crate::sync::{CompletionBarrier, Mailbox, StageSlot};
use crate::types::{Frame, StageFlags, StageKind, TrackingStatus};

pub use managers::{intake_loop, phase1_loop, phase2_loop};
pub use workers::{
    body_loop, face_loop, focus_loop, gesture_loop, keypoints_loop, reid_loop,
};

/// One activation slot per stage.
pub struct StageSlots {
    body: StageSlot,
    face: StageSlot,
    focus: StageSlot,
    gesture: StageSlot,
    keypoints: StageSlot,
    reid: StageSlot,
}

impl StageSlots {
    fn new() -> Self {
        Self {
            body: StageSlot::new(),
            face: StageSlot::new(),
            focus: StageSlot::new(),
            gesture: StageSlot::new(),
            keypoints: StageSlot::new(),
            reid: StageSlot::new(),
        }
    }

    pub fn get(&self, kind: StageKind) -> &StageSlot {
        match kind {
            StageKind::Body => &self.body,
            StageKind::Face => &self.face,
            StageKind::Focus => &self.focus,
            StageKind::Gesture => &self.gesture,
            StageKind::Keypoints => &self.keypoints,
            StageKind::Reid => &self.reid,
        }
    }
}

/// State shared by the intake thread, both managers, all six workers and
/// the lifecycle controller.
pub struct PipelineShared {
    alive: AtomicBool,
    pub flags: StageFlags,
    /// Latest frame for the Phase-1 manager and its workers.
    pub frames: Mailbox<Frame>,
    /// Latest frame for the enrollment sub-pipeline. Separate mailbox so
    /// the two consumers cannot starve each other of freshness marks;
    /// `Arc`'d because enrollment sessions hold it directly.
    pub enroll_frames: Arc<Mailbox<Frame>>,
    pub slots: StageSlots,
    pub barrier: CompletionBarrier,
    pub history: BodyHistory,
    pub collector: ResultCollector,
    pub status: Mutex<TrackingStatus>,
    pub bus: OutputBus,
}

impl PipelineShared {
    pub fn new(history_depth: usize, bus: OutputBus) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(false),
            flags: StageFlags::default(),
            frames: Mailbox::new(),
            enroll_frames: Arc::new(Mailbox::new()),
            slots: StageSlots::new(),
            barrier: CompletionBarrier::new(),
            history: BodyHistory::new(history_depth),
            collector: ResultCollector::new(),
            status: Mutex::new(TrackingStatus::Selecting),
            bus,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, value: bool) {
        self.alive.store(value, Ordering::SeqCst);
    }

    /// Activate one stage for the current cycle: under the slot lock, if no
    /// wakeup is outstanding, count it on the barrier and mark the slot
    /// pending. Returns whether the stage was newly activated.
    pub fn schedule_stage(&self, kind: StageKind) -> bool {
        let slot = self.slots.get(kind);
        slot.wake_with(|| self.barrier.add(1))
    }

    /// Report one stage done: under the barrier lock, merge the stage's
    /// contribution into the in-flight record, then decrement. The merge
    /// runs exactly once per activation, failure or not (a failed stage
    /// merges nothing but still decrements).
    pub fn finish_stage<F: FnOnce(&mut FrameResult)>(&self, merge: F) {
        self.barrier.complete_with(|| self.collector.merge(merge));
    }

    pub fn tracking_status(&self) -> TrackingStatus {
        *self.status.lock()
    }

    pub fn set_tracking_status(&self, status: TrackingStatus) {
        *self.status.lock() = status;
    }

    /// Release every blocking wait point so no thread can sleep through
    /// deactivation. Liveness must already be cleared.
    pub fn force_wake_all(&self) {
        self.frames.force_wake();
        self.enroll_frames.force_wake();
        self.history.force_wake();
        self.barrier.force_release();
    }
}

/// Wall-clock nanoseconds for result stamping.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<PipelineShared> {
        let (bus, _taps) = OutputBus::new();
        PipelineShared::new(6, bus)
    }

    #[test]
    fn test_schedule_increments_barrier_once() {
        let shared = shared();
        assert!(shared.schedule_stage(StageKind::Body));
        // Second activation while pending is a no-op.
        assert!(!shared.schedule_stage(StageKind::Body));
        assert_eq!(shared.barrier.outstanding(), 1);
    }

    #[test]
    fn test_finish_merges_and_decrements() {
        let shared = shared();
        shared.schedule_stage(StageKind::Face);
        shared.finish_stage(|r| r.stamp_ns = 7);
        assert_eq!(shared.barrier.outstanding(), 0);
        assert_eq!(shared.collector.take_for_publish(1).stamp_ns, 1);
    }

    #[test]
    fn test_force_wake_all_releases_barrier() {
        let shared = shared();
        shared.barrier.add(2);
        shared.force_wake_all();
        assert_eq!(shared.barrier.outstanding(), 0);
    }
}
