//! Frame intake and the two phase-manager loops.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::ipc::FrameSource;
use crate::types::StageKind;

use super::{now_ns, PipelineShared};

/// Bound on one frame-channel wait, so the intake thread re-checks liveness
/// even when the camera never produces.
const INTAKE_WAIT: Duration = Duration::from_millis(100);

/// Pull frames from the camera channel and publish each to both mailboxes.
///
/// Exits on deactivation or on a frame-channel resource fault; the latter is
/// fatal to the pipeline and logged as such.
pub fn intake_loop(shared: Arc<PipelineShared>, source: Arc<Mutex<Box<dyn FrameSource>>>) {
    loop {
        if !shared.is_alive() {
            break;
        }
        match source.lock().next_frame(INTAKE_WAIT) {
            Ok(Some(frame)) => {
                debug!(stamp_ns = frame.stamp_ns, "frame acquired");
                shared.enroll_frames.publish(frame.clone());
                shared.frames.publish(frame);
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "frame channel fault, stopping intake");
                break;
            }
        }
    }
    info!("intake thread exiting");
}

/// Phase-1 manager: off every fresh frame, activate the enabled stages that
/// need only the image (body, face, focus). Owns the cycle's publish when no
/// body-dependent stage is enabled.
pub fn phase1_loop(shared: Arc<PipelineShared>) {
    loop {
        let frame = shared.frames.wait_fresh();
        if !shared.is_alive() {
            break;
        }
        if frame.is_none() {
            continue;
        }
        debug!("phase-1 manager woke for new frame");

        for kind in [StageKind::Body, StageKind::Face, StageKind::Focus] {
            if shared.flags.enabled(kind) && shared.schedule_stage(kind) {
                debug!(stage = ?kind, "stage activated");
            }
        }

        // If no dependent stage is enabled this manager publishes; otherwise
        // Phase-2 owns the publish for the cycle (exactly one of the two).
        if !shared.flags.any_dependent() && shared.flags.any_primary() {
            shared.barrier.wait_zero();
            if !shared.is_alive() {
                break;
            }
            publish_cycle(&shared);
        }
    }
    info!("phase-1 manager exiting");
}

/// Phase-2 manager: off every fresh body-history append, activate the
/// enabled stages that consume body boxes (reid, gesture, keypoints). Owns
/// the cycle's publish whenever any of them is enabled.
pub fn phase2_loop(shared: Arc<PipelineShared>) {
    loop {
        shared.history.wait_fresh();
        if !shared.is_alive() {
            break;
        }
        debug!("phase-2 manager woke for body results");

        for kind in [StageKind::Reid, StageKind::Gesture, StageKind::Keypoints] {
            if shared.flags.enabled(kind) && shared.schedule_stage(kind) {
                debug!(stage = ?kind, "stage activated");
            }
        }

        if shared.flags.any_dependent() {
            shared.barrier.wait_zero();
            if !shared.is_alive() {
                break;
            }
            publish_cycle(&shared);
        }
    }
    info!("phase-2 manager exiting");
}

/// Publish-and-reset: stamp the aggregated record, ship it, leave a fresh
/// empty record behind, and mirror the tracking status when a tracking
/// stage is on. The sole reset site for the record.
fn publish_cycle(shared: &PipelineShared) {
    let result = shared.collector.take_for_publish(now_ns());
    debug!(
        bodies = result.bodies.len(),
        faces = result.faces.len(),
        tracked = result.track.is_some(),
        "publishing cycle result"
    );
    shared.bus.publish_result(result);

    if shared.flags.enabled(StageKind::Body) || shared.flags.enabled(StageKind::Focus) {
        shared.bus.publish_status(shared.tracking_status());
    }
}
