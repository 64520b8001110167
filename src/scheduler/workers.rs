//! The six stage worker loops.
//!
//! One pattern throughout: wait on the stage slot, check liveness, fetch
//! input, invoke the provider, then merge-and-decrement through
//! `finish_stage`. A provider failure or missing input is non-fatal to the
//! cycle: the stage contributes nothing but still decrements exactly once.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::enrollment::FaceLibrary;
use crate::history::BodyHistoryEntry;
use crate::providers::{
    BodyDetector, FaceRecognizer, FocusTracker, GestureRecognizer, KeypointsDetector, PersonReid,
};
use crate::types::{StageKind, TrackedBox, TrackingStatus};

use super::PipelineShared;

pub fn body_loop(shared: Arc<PipelineShared>, provider: Arc<Mutex<dyn BodyDetector>>) {
    loop {
        shared.slots.get(StageKind::Body).wait_pending();
        if !shared.is_alive() {
            break;
        }

        let Some(frame) = shared.frames.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        match provider.lock().detect(&frame.image) {
            Ok(detections) => {
                debug!(count = detections.len(), "body detection done");
                // Feed the dependent stages before reporting completion so
                // Phase-2 sees the history entry for this cycle.
                shared.history.push(BodyHistoryEntry {
                    detections: detections.clone(),
                    frame,
                });
                shared.finish_stage(move |r| r.bodies = detections);
            }
            Err(e) => {
                warn!(error = %e, "body detection failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("body worker exiting");
}

pub fn face_loop(
    shared: Arc<PipelineShared>,
    provider: Arc<Mutex<dyn FaceRecognizer>>,
    library: Arc<Mutex<FaceLibrary>>,
) {
    loop {
        shared.slots.get(StageKind::Face).wait_pending();
        if !shared.is_alive() {
            break;
        }

        let Some(frame) = shared.frames.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        let known_faces = library.lock().features();
        match provider.lock().recognize(&frame.image, &known_faces) {
            Ok(matches) => {
                debug!(count = matches.len(), "face recognition done");
                shared.finish_stage(move |r| r.faces = matches);
            }
            Err(e) => {
                warn!(error = %e, "face recognition failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("face worker exiting");
}

pub fn focus_loop(shared: Arc<PipelineShared>, provider: Arc<Mutex<dyn FocusTracker>>) {
    loop {
        shared.slots.get(StageKind::Focus).wait_pending();
        if !shared.is_alive() {
            break;
        }

        let Some(frame) = shared.frames.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        let (tracked, lost) = {
            let mut tracker = provider.lock();
            (tracker.track(&frame.image), tracker.lost())
        };
        if lost {
            warn!("focus tracker lost its target");
            shared.set_tracking_status(TrackingStatus::Selecting);
        }

        match tracked {
            Ok(Some(rect)) => {
                let stamp_ns = frame.stamp_ns;
                shared.finish_stage(move |r| r.track = Some(TrackedBox { rect, stamp_ns }));
            }
            Ok(None) => shared.finish_stage(|_| {}),
            Err(e) => {
                warn!(error = %e, "focus tracking failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("focus worker exiting");
}

pub fn reid_loop(shared: Arc<PipelineShared>, provider: Arc<Mutex<dyn PersonReid>>) {
    loop {
        shared.slots.get(StageKind::Reid).wait_pending();
        if !shared.is_alive() {
            break;
        }

        // No body results yet: nothing to do, not an error.
        let Some(entry) = shared.history.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        let (identified, lost) = {
            let mut reid = provider.lock();
            (
                reid.identify(&entry.frame.image, &entry.detections),
                reid.lost(),
            )
        };
        if lost {
            warn!("reid lost its target");
            shared.set_tracking_status(TrackingStatus::Selecting);
        }

        match identified {
            Ok(Some((person_id, rect))) => {
                debug!(person_id, "reid matched tracked person");
                let stamp_ns = entry.frame.stamp_ns;
                shared.finish_stage(move |r| {
                    // Tag the best-overlapping detection with the person id.
                    let mut best: Option<(f64, usize)> = None;
                    for (i, body) in r.bodies.iter().enumerate() {
                        let iou = body.rect.iou(&rect);
                        if iou > 0.0 && best.map_or(true, |(b, _)| iou > b) {
                            best = Some((iou, i));
                        }
                    }
                    if let Some((_, i)) = best {
                        r.bodies[i].reid = Some(person_id.to_string());
                    }
                    r.track = Some(TrackedBox { rect, stamp_ns });
                });
            }
            Ok(None) => shared.finish_stage(|_| {}),
            Err(e) => {
                warn!(error = %e, "reid failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("reid worker exiting");
}

pub fn gesture_loop(shared: Arc<PipelineShared>, provider: Arc<Mutex<dyn GestureRecognizer>>) {
    loop {
        shared.slots.get(StageKind::Gesture).wait_pending();
        if !shared.is_alive() {
            break;
        }

        let Some(entry) = shared.history.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        match provider.lock().recognize(&entry.frame.image, &entry.detections) {
            Ok(gestures) => {
                debug!(count = gestures.len(), "gesture recognition done");
                shared.finish_stage(move |r| r.gestures = gestures);
            }
            Err(e) => {
                warn!(error = %e, "gesture recognition failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("gesture worker exiting");
}

pub fn keypoints_loop(shared: Arc<PipelineShared>, provider: Arc<Mutex<dyn KeypointsDetector>>) {
    loop {
        shared.slots.get(StageKind::Keypoints).wait_pending();
        if !shared.is_alive() {
            break;
        }

        let Some(entry) = shared.history.latest() else {
            shared.finish_stage(|_| {});
            continue;
        };

        match provider.lock().detect(&entry.frame.image, &entry.detections) {
            Ok(keypoints) => {
                debug!(bodies = keypoints.len(), "keypoints detection done");
                shared.finish_stage(move |r| r.keypoints = keypoints);
            }
            Err(e) => {
                warn!(error = %e, "keypoints detection failed for current frame");
                shared.finish_stage(|_| {});
            }
        }
    }
    info!("keypoints worker exiting");
}
