//! On-robot perception orchestrator.
//!
//! Pulls camera frames from a shared-memory channel, fans them out to the
//! independently enabled perception stages (body, face, focus, gesture,
//! keypoints, reid), synchronizes their completion behind a barrier, and
//! publishes one aggregated result per frame cycle.
//!
//! Data flow: camera -> [`ipc::FrameChannel`] -> frame mailbox -> Phase-1
//! stages -> [`history::BodyHistory`] -> Phase-2 stages ->
//! [`result::FrameResult`] -> publish. Control flow is owned entirely by
//! [`manager::VisionManager`].

pub mod config;
pub mod enrollment;
pub mod history;
pub mod ipc;
pub mod manager;
pub mod providers;
pub mod result;
pub mod scheduler;
pub mod sync;
pub mod types;

pub use config::VisionConfig;
pub use manager::{FaceCommand, FaceCommandOutcome, LifecycleState, VisionManager};
pub use result::FrameResult;
pub use types::{Rect, StageKind, TrackingStatus};
