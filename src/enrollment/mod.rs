//! Face enrollment: library persistence plus the capture sub-pipeline.
//!
//! Enrollment runs independently of the frame-cycle machinery: it consumes
//! its own frame mailbox, holds neither the completion barrier nor the
//! result record, and reports over its own progress stream.

mod library;
mod session;

use crate::types::Image;

pub use library::{FaceLibrary, PoseCheck};
pub use session::{spawn_session, EnrollOutcome, EnrollmentHandle};

/// Result code published when a capture is accepted into the pending cache.
pub const CODE_ACCEPTED: i32 = 0;
/// Result code published when the face is already in the library.
pub const CODE_ALREADY_ENROLLED: i32 = 17;
/// Result code published when the capture window expires.
pub const CODE_TIMEOUT: i32 = 3;

/// Match score above which an enrollment candidate counts as a duplicate.
pub const DUPLICATE_MATCH_THRESHOLD: f32 = 0.65;

/// One per-iteration progress event of an enrollment session.
#[derive(Debug, Clone)]
pub struct EnrollProgress {
    pub code: i32,
    pub username: String,
    pub message: String,
    /// The captured frame, attached on accept and duplicate-reject so the
    /// caller can show what was captured.
    pub image: Option<Image>,
}
