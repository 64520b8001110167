//! Per-cycle aggregated result and the published output streams.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::enrollment::EnrollProgress;
use crate::types::{BodyDetection, FaceMatch, GestureInfo, Keypoint, TrackedBox, TrackingStatus};

/// Everything the active stages contributed for one frame cycle.
///
/// Lifecycle: workers merge into the record under the collector lock; the
/// owning manager stamps, publishes, and replaces it with a fresh record.
/// Nothing else ever clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
    /// Publish time in nanoseconds since the epoch.
    pub stamp_ns: u64,
    pub bodies: Vec<BodyDetection>,
    pub faces: Vec<FaceMatch>,
    pub gestures: Vec<GestureInfo>,
    /// One keypoint set per body, same order as `bodies`.
    pub keypoints: Vec<Vec<Keypoint>>,
    pub track: Option<TrackedBox>,
}

/// The in-flight record behind its own lock.
pub struct ResultCollector {
    record: Mutex<FrameResult>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self { record: Mutex::new(FrameResult::default()) }
    }

    /// Merge a stage contribution into the in-flight record.
    pub fn merge<F: FnOnce(&mut FrameResult)>(&self, f: F) {
        f(&mut self.record.lock());
    }

    /// Stamp the record, hand back a copy for publishing, and reset the
    /// slot to an empty record. The only reset site.
    pub fn take_for_publish(&self, stamp_ns: u64) -> FrameResult {
        let mut record = self.record.lock();
        record.stamp_ns = stamp_ns;
        std::mem::take(&mut record)
    }
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out of the three published streams. Senders live with the pipeline;
/// receivers are handed to the embedding service layer.
pub struct OutputBus {
    pub results: Sender<FrameResult>,
    pub status: Sender<TrackingStatus>,
    pub enroll: Sender<EnrollProgress>,
}

/// Receiver halves of the output bus.
pub struct OutputTaps {
    pub results: Receiver<FrameResult>,
    pub status: Receiver<TrackingStatus>,
    pub enroll: Receiver<EnrollProgress>,
}

impl OutputBus {
    pub fn new() -> (Self, OutputTaps) {
        let (results_tx, results_rx) = unbounded();
        let (status_tx, status_rx) = unbounded();
        let (enroll_tx, enroll_rx) = unbounded();
        (
            Self { results: results_tx, status: status_tx, enroll: enroll_tx },
            OutputTaps { results: results_rx, status: status_rx, enroll: enroll_rx },
        )
    }

    pub fn publish_result(&self, result: FrameResult) {
        if self.results.send(result).is_err() {
            warn!("result receiver dropped, discarding frame result");
        }
    }

    pub fn publish_status(&self, status: TrackingStatus) {
        if self.status.send(status).is_err() {
            warn!("status receiver dropped, discarding tracking status");
        }
    }

    pub fn publish_enroll(&self, progress: EnrollProgress) {
        if self.enroll.send(progress).is_err() {
            warn!("enrollment receiver dropped, discarding progress event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    #[test]
    fn test_merge_then_publish_resets() {
        let collector = ResultCollector::new();
        collector.merge(|r| {
            r.bodies.push(BodyDetection { rect: Rect::new(1, 2, 3, 4), score: 0.8, reid: None });
        });
        let published = collector.take_for_publish(42);
        assert_eq!(published.stamp_ns, 42);
        assert_eq!(published.bodies.len(), 1);

        // Record is empty again after publish.
        let next = collector.take_for_publish(43);
        assert!(next.bodies.is_empty());
        assert!(next.track.is_none());
    }

    #[test]
    fn test_bus_roundtrip() {
        let (bus, taps) = OutputBus::new();
        bus.publish_status(TrackingStatus::Tracking);
        assert_eq!(taps.status.try_recv().unwrap(), TrackingStatus::Tracking);
        bus.publish_result(FrameResult::default());
        assert!(taps.results.try_recv().is_ok());
    }
}
