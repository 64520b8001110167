//! Deterministic stand-in providers.
//!
//! These play the role the real model-backed libraries play on the robot:
//! configurable canned outputs, a switchable failure mode, and enough
//! tracker state to exercise the SELECTING/TRACKING transitions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};

use crate::types::{
    BodyDetection, FaceMatch, GestureInfo, Image, Keypoint, Rect, KEYPOINTS_PER_BODY,
};

use super::{
    BodyDetector, CameraControl, FaceFeatureMap, FaceInfo, FaceRecognizer, FocusTracker,
    GestureRecognizer, KeypointsDetector, PersonReid,
};

#[derive(Default)]
pub struct StubBodyDetector {
    pub detections: Vec<BodyDetection>,
    pub fail: bool,
}

impl BodyDetector for StubBodyDetector {
    fn detect(&mut self, _image: &Image) -> Result<Vec<BodyDetection>> {
        if self.fail {
            bail!("stub body detector failure");
        }
        Ok(self.detections.clone())
    }
}

#[derive(Default)]
pub struct StubFaceRecognizer {
    pub faces: Vec<FaceInfo>,
    pub matches: Vec<FaceMatch>,
    pub fail: bool,
}

impl FaceRecognizer for StubFaceRecognizer {
    fn detect_faces(&mut self, _image: &Image) -> Result<Vec<FaceInfo>> {
        if self.fail {
            bail!("stub face detector failure");
        }
        Ok(self.faces.clone())
    }

    fn recognize(&mut self, _image: &Image, _library: &FaceFeatureMap) -> Result<Vec<FaceMatch>> {
        if self.fail {
            bail!("stub face recognizer failure");
        }
        Ok(self.matches.clone())
    }
}

#[derive(Default)]
pub struct StubFocusTracker {
    target: Option<Rect>,
    pub report_lost: bool,
    pub fail_set: bool,
}

impl FocusTracker for StubFocusTracker {
    fn track(&mut self, _image: &Image) -> Result<Option<Rect>> {
        Ok(self.target)
    }

    fn set_target(&mut self, _image: &Image, rect: Rect) -> Result<()> {
        if self.fail_set {
            bail!("stub focus tracker rejected target");
        }
        self.target = Some(rect);
        self.report_lost = false;
        Ok(())
    }

    fn lost(&self) -> bool {
        self.report_lost
    }

    fn reset(&mut self) {
        self.target = None;
        self.report_lost = false;
    }
}

pub struct StubGestureRecognizer {
    pub label: i32,
    pub fail: bool,
}

impl Default for StubGestureRecognizer {
    fn default() -> Self {
        Self { label: 1, fail: false }
    }
}

impl GestureRecognizer for StubGestureRecognizer {
    fn recognize(&mut self, _image: &Image, bodies: &[BodyDetection]) -> Result<Vec<GestureInfo>> {
        if self.fail {
            bail!("stub gesture recognizer failure");
        }
        Ok(bodies
            .iter()
            .map(|b| GestureInfo { rect: b.rect, label: self.label })
            .collect())
    }
}

#[derive(Default)]
pub struct StubKeypointsDetector {
    pub fail: bool,
}

impl KeypointsDetector for StubKeypointsDetector {
    fn detect(&mut self, _image: &Image, bodies: &[BodyDetection]) -> Result<Vec<Vec<Keypoint>>> {
        if self.fail {
            bail!("stub keypoints detector failure");
        }
        Ok(bodies
            .iter()
            .map(|b| {
                vec![
                    Keypoint { x: b.rect.x as f32, y: b.rect.y as f32 };
                    KEYPOINTS_PER_BODY
                ]
            })
            .collect())
    }
}

#[derive(Default)]
pub struct StubPersonReid {
    target: Option<Vec<f32>>,
    pub person_id: i32,
    pub report_lost: bool,
    pub fail_set: bool,
}

impl PersonReid for StubPersonReid {
    fn identify(
        &mut self,
        _image: &Image,
        bodies: &[BodyDetection],
    ) -> Result<Option<(i32, Rect)>> {
        if self.target.is_none() {
            return Ok(None);
        }
        Ok(bodies.first().map(|b| (self.person_id, b.rect)))
    }

    fn set_target(&mut self, _image: &Image, _rect: Rect) -> Result<Vec<f32>> {
        if self.fail_set {
            bail!("stub reid rejected target");
        }
        let feature = vec![0.5f32; 128];
        self.target = Some(feature.clone());
        self.report_lost = false;
        Ok(feature)
    }

    fn lost(&self) -> bool {
        self.report_lost
    }

    fn reset(&mut self) {
        self.target = None;
        self.report_lost = false;
    }
}

/// Camera hook that only counts calls; the demo has no real camera service.
#[derive(Default)]
pub struct StubCamera {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl CameraControl for StubCamera {
    fn start_stream(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("stub camera refused to start streaming");
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_stream(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
