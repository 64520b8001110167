//! Core data types shared across the pipeline.
//!
//! A `Frame` is immutable after creation: it is copied out of shared memory
//! once, then superseded (never mutated) by the next capture. Everything the
//! stages produce is merged into a single `FrameResult` per cycle.

use std::sync::atomic::{AtomicBool, Ordering};

/// Number of skeleton keypoints produced per detected body.
pub const KEYPOINTS_PER_BODY: usize = 17;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Intersection-over-union with another box. Zero-area boxes yield 0.0.
    pub fn iou(&self, other: &Rect) -> f64 {
        let ix = self
            .x
            .saturating_add(self.w)
            .min(other.x.saturating_add(other.w))
            .saturating_sub(self.x.max(other.x));
        let iy = self
            .y
            .saturating_add(self.h)
            .min(other.y.saturating_add(other.h))
            .saturating_sub(self.y.max(other.y));
        let inter = (ix as f64) * (iy as f64);
        let union = (self.w as f64) * (self.h as f64) + (other.w as f64) * (other.h as f64) - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Raw HxWx3 pixel buffer. Opaque to the orchestrator; only the capability
/// providers interpret the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Expected byte length of an image with the given geometry.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// One captured camera frame with its capture timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: Image,
    pub stamp_ns: u64,
}

/// One detected body. The reid field is filled by the re-identification
/// stage when it matches this detection to the tracked person.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BodyDetection {
    pub rect: Rect,
    pub score: f32,
    pub reid: Option<String>,
}

/// One recognized face matched against the face library.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub rect: Rect,
    pub id: String,
    pub score: f32,
    pub match_score: f32,
    /// Head pose: yaw, pitch, roll in degrees.
    pub pose: [f32; 3],
}

/// One recognized gesture, positioned on the body it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureInfo {
    pub rect: Rect,
    pub label: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// Box of the currently tracked target, stamped with the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub rect: Rect,
    pub stamp_ns: u64,
}

/// Whether the tracker currently has a locked-on target.
///
/// Transitions: `Selecting -> Tracking` on a successful target-set,
/// `Tracking -> Selecting` when focus or reid reports target loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Waiting for a target to be selected.
    Selecting,
    /// Actively tracking a selected target.
    Tracking,
}

impl Default for TrackingStatus {
    fn default() -> Self {
        Self::Selecting
    }
}

/// The six perception stages the schedulers coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Body,
    Face,
    Focus,
    Gesture,
    Keypoints,
    Reid,
}

impl StageKind {
    /// Stages that consume body bounding boxes and therefore cannot run
    /// before body detection has produced a result.
    pub fn depends_on_body(&self) -> bool {
        matches!(self, Self::Gesture | Self::Keypoints | Self::Reid)
    }
}

/// Per-stage enablement flags, externally settable at any time.
///
/// Flips take effect from the next frame cycle; no lock-protected invariant
/// spans these beyond plain atomic visibility.
#[derive(Debug, Default)]
pub struct StageFlags {
    body: AtomicBool,
    face: AtomicBool,
    focus: AtomicBool,
    gesture: AtomicBool,
    keypoints: AtomicBool,
    reid: AtomicBool,
}

impl StageFlags {
    fn cell(&self, kind: StageKind) -> &AtomicBool {
        match kind {
            StageKind::Body => &self.body,
            StageKind::Face => &self.face,
            StageKind::Focus => &self.focus,
            StageKind::Gesture => &self.gesture,
            StageKind::Keypoints => &self.keypoints,
            StageKind::Reid => &self.reid,
        }
    }

    pub fn set(&self, kind: StageKind, enabled: bool) {
        self.cell(kind).store(enabled, Ordering::SeqCst);
    }

    pub fn enabled(&self, kind: StageKind) -> bool {
        self.cell(kind).load(Ordering::SeqCst)
    }

    /// True if any of gesture/keypoints/reid is enabled, i.e. the Phase-2
    /// manager owns the publish for the cycle.
    pub fn any_dependent(&self) -> bool {
        self.enabled(StageKind::Gesture)
            || self.enabled(StageKind::Keypoints)
            || self.enabled(StageKind::Reid)
    }

    /// True if any of body/face/focus is enabled.
    pub fn any_primary(&self) -> bool {
        self.enabled(StageKind::Body)
            || self.enabled(StageKind::Face)
            || self.enabled(StageKind::Focus)
    }

    pub fn clear_all(&self) {
        for kind in [
            StageKind::Body,
            StageKind::Face,
            StageKind::Focus,
            StageKind::Gesture,
            StageKind::Keypoints,
            StageKind::Reid,
        ] {
            self.set(kind, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = Rect::new(10, 10, 100, 100);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(100, 100, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 0, 10, 10);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_iou_edge_coordinates_do_not_overflow() {
        let a = Rect::new(u32::MAX - 10, u32::MAX - 10, 100, 100);
        let b = Rect::new(0, 0, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_zero_area() {
        let a = Rect::new(0, 0, 0, 0);
        let b = Rect::new(0, 0, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_flags_default_disabled() {
        let flags = StageFlags::default();
        assert!(!flags.any_primary());
        assert!(!flags.any_dependent());
    }

    #[test]
    fn test_flags_dependent_split() {
        let flags = StageFlags::default();
        flags.set(StageKind::Reid, true);
        assert!(flags.any_dependent());
        assert!(!flags.any_primary());
        flags.set(StageKind::Body, true);
        assert!(flags.any_primary());
        flags.clear_all();
        assert!(!flags.enabled(StageKind::Reid));
        assert!(!flags.enabled(StageKind::Body));
    }

    #[test]
    fn test_depends_on_body() {
        assert!(StageKind::Reid.depends_on_body());
        assert!(StageKind::Gesture.depends_on_body());
        assert!(StageKind::Keypoints.depends_on_body());
        assert!(!StageKind::Body.depends_on_body());
        assert!(!StageKind::Face.depends_on_body());
        assert!(!StageKind::Focus.depends_on_body());
    }
}
