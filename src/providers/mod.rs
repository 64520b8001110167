//! Capability provider boundaries.
//!
//! The perception algorithms themselves (model inference) live behind these
//! traits and are consumed as opaque `process(image, ...) -> result` calls.
//! Each provider is invoked from exactly one worker thread at a time; the
//! focus and reid trackers are additionally poked by the tracking-target
//! service, so every provider is shared as `Arc<Mutex<dyn ...>>`.

mod stub;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::types::{BodyDetection, FaceMatch, GestureInfo, Image, Keypoint, Rect};

pub use stub::{
    StubBodyDetector, StubCamera, StubFaceRecognizer, StubFocusTracker, StubGestureRecognizer,
    StubKeypointsDetector, StubPersonReid,
};

/// Face library snapshot handed to recognition: username to feature vector.
pub type FaceFeatureMap = HashMap<String, Vec<f32>>;

/// A face found in a frame before any library matching.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceInfo {
    pub rect: Rect,
    /// Head pose: yaw, pitch, roll in degrees.
    pub pose: [f32; 3],
    pub features: Vec<f32>,
}

pub trait BodyDetector: Send {
    fn detect(&mut self, image: &Image) -> Result<Vec<BodyDetection>>;
}

pub trait FaceRecognizer: Send {
    /// Detect faces without library matching (enrollment path).
    fn detect_faces(&mut self, image: &Image) -> Result<Vec<FaceInfo>>;

    /// Detect and match faces against a library snapshot.
    fn recognize(&mut self, image: &Image, library: &FaceFeatureMap) -> Result<Vec<FaceMatch>>;
}

pub trait FocusTracker: Send {
    /// Track the current target in a new frame. `Ok(None)` means no box
    /// this frame (not an error).
    fn track(&mut self, image: &Image) -> Result<Option<Rect>>;

    /// Lock onto a target region.
    fn set_target(&mut self, image: &Image, rect: Rect) -> Result<()>;

    /// Whether the tracker has lost its target since the last query.
    fn lost(&self) -> bool;

    /// Drop any tracked target.
    fn reset(&mut self);
}

pub trait GestureRecognizer: Send {
    fn recognize(&mut self, image: &Image, bodies: &[BodyDetection]) -> Result<Vec<GestureInfo>>;
}

pub trait KeypointsDetector: Send {
    /// One keypoint set per input body, in order.
    fn detect(&mut self, image: &Image, bodies: &[BodyDetection]) -> Result<Vec<Vec<Keypoint>>>;
}

pub trait PersonReid: Send {
    /// Re-identify the tracked person among the detected bodies. Returns
    /// the person id and its box, or `Ok(None)` when nobody matches.
    fn identify(&mut self, image: &Image, bodies: &[BodyDetection])
        -> Result<Option<(i32, Rect)>>;

    /// Extract features from a region and make it the tracked target.
    fn set_target(&mut self, image: &Image, rect: Rect) -> Result<Vec<f32>>;

    fn lost(&self) -> bool;

    fn reset(&mut self);
}

/// Hook to the external camera service: start/stop the frame stream around
/// pipeline activation.
pub trait CameraControl: Send + Sync {
    fn start_stream(&self) -> Result<()>;
    fn stop_stream(&self) -> Result<()>;
}

/// The full set of capability providers the pipeline consumes.
#[derive(Clone)]
pub struct ProviderSet {
    pub body: Arc<Mutex<dyn BodyDetector>>,
    pub face: Arc<Mutex<dyn FaceRecognizer>>,
    pub focus: Arc<Mutex<dyn FocusTracker>>,
    pub gesture: Arc<Mutex<dyn GestureRecognizer>>,
    pub keypoints: Arc<Mutex<dyn KeypointsDetector>>,
    pub reid: Arc<Mutex<dyn PersonReid>>,
    pub camera: Arc<dyn CameraControl>,
}

impl ProviderSet {
    /// Deterministic stub providers for the demo binary and tests.
    pub fn stubs() -> Self {
        Self {
            body: Arc::new(Mutex::new(StubBodyDetector::default())),
            face: Arc::new(Mutex::new(StubFaceRecognizer::default())),
            focus: Arc::new(Mutex::new(StubFocusTracker::default())),
            gesture: Arc::new(Mutex::new(StubGestureRecognizer::default())),
            keypoints: Arc::new(Mutex::new(StubKeypointsDetector::default())),
            reid: Arc::new(Mutex::new(StubPersonReid::default())),
            camera: Arc::new(StubCamera::default()),
        }
    }

    /// Reset tracker state on the stateful providers (deactivation).
    pub fn reset_trackers(&self) {
        self.focus.lock().reset();
        self.reid.lock().reset();
    }
}
