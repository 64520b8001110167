//! The bounded face-capture session.
//!
//! Spawned per add-face command. The session owns nothing of the frame-cycle
//! machinery; it reads its own frame mailbox, publishes one progress event
//! per iteration, and terminates on accept, duplicate-reject, cancel, or
//! deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::providers::FaceRecognizer;
use crate::sync::Mailbox;
use crate::types::Frame;

use super::library::{check_face_pose, FaceLibrary, PoseCheck};
use super::{
    EnrollProgress, CODE_ACCEPTED, CODE_ALREADY_ENROLLED, CODE_TIMEOUT,
    DUPLICATE_MATCH_THRESHOLD,
};

/// How long one iteration waits for a frame before re-checking the cancel
/// flag and the deadline.
const FRAME_WAIT: Duration = Duration::from_millis(200);

/// Terminal state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// A qualifying face was captured and cached for confirmation.
    Accepted,
    /// The face is already enrolled.
    Rejected,
    /// The capture window expired without a qualifying face.
    TimedOut,
    /// The caller cancelled the session.
    Cancelled,
}

/// Handle to a running capture session; the lifecycle controller keeps it
/// so deactivation can cancel and join instead of orphaning the thread.
pub struct EnrollmentHandle {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<EnrollOutcome>>,
}

impl EnrollmentHandle {
    /// Request cooperative termination.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the session thread and return its outcome.
    pub fn join(mut self) -> EnrollOutcome {
        match self.handle.take() {
            Some(h) => h.join().unwrap_or(EnrollOutcome::Cancelled),
            None => EnrollOutcome::Cancelled,
        }
    }
}

/// Spawn a capture session for `username`.
pub fn spawn_session(
    username: String,
    frames: Arc<Mailbox<Frame>>,
    face: Arc<Mutex<dyn FaceRecognizer>>,
    library: Arc<Mutex<FaceLibrary>>,
    progress: Sender<EnrollProgress>,
    timeout: Duration,
) -> EnrollmentHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancel);
    let handle = thread::Builder::new()
        .name(format!("enroll-{username}"))
        .spawn(move || run_session(username, frames, face, library, progress, timeout, cancel_flag))
        .expect("spawning enrollment thread");
    EnrollmentHandle { cancel, handle: Some(handle) }
}

fn publish(progress: &Sender<EnrollProgress>, event: EnrollProgress) {
    if progress.send(event).is_err() {
        warn!("enrollment progress receiver dropped");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_session(
    username: String,
    frames: Arc<Mailbox<Frame>>,
    face: Arc<Mutex<dyn FaceRecognizer>>,
    library: Arc<Mutex<FaceLibrary>>,
    progress: Sender<EnrollProgress>,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
) -> EnrollOutcome {
    let deadline = Instant::now() + timeout;
    // Snapshot once; faces confirmed mid-session are deliberately not seen.
    let known_faces = library.lock().features();

    while Instant::now() < deadline {
        if cancel.load(Ordering::SeqCst) {
            info!(username, "enrollment cancelled");
            return EnrollOutcome::Cancelled;
        }

        let frame: Frame = match frames.wait_fresh_for(FRAME_WAIT) {
            Some(Some(frame)) => frame,
            // Timeout or forced wake without a frame: re-check and retry.
            _ => continue,
        };

        let faces = match face.lock().detect_faces(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                warn!(username, error = %e, "face detection failed during enrollment");
                continue;
            }
        };

        let check = check_face_pose(&faces);
        if check != PoseCheck::Ok {
            publish(
                &progress,
                EnrollProgress {
                    code: check.code(),
                    username: username.clone(),
                    message: check.message().to_string(),
                    image: None,
                },
            );
            continue;
        }

        // Duplicate check against the library snapshot.
        let matches = face
            .lock()
            .recognize(&frame.image, &known_faces)
            .unwrap_or_default();
        if let Some(hit) = matches
            .iter()
            .find(|m| m.match_score > DUPLICATE_MATCH_THRESHOLD)
        {
            warn!(username, matched = %hit.id, score = hit.match_score, "face already enrolled");
            publish(
                &progress,
                EnrollProgress {
                    code: CODE_ALREADY_ENROLLED,
                    username: hit.id.clone(),
                    message: "face already enrolled".to_string(),
                    image: Some(frame.image.clone()),
                },
            );
            return EnrollOutcome::Rejected;
        }

        // Qualifying capture: cache the feature for a later confirm.
        library.lock().cache_feature(faces[0].features.clone());
        publish(
            &progress,
            EnrollProgress {
                code: CODE_ACCEPTED,
                username: username.clone(),
                message: "face captured".to_string(),
                image: Some(frame.image.clone()),
            },
        );
        info!(username, "enrollment capture accepted");
        return EnrollOutcome::Accepted;
    }

    if cancel.load(Ordering::SeqCst) {
        return EnrollOutcome::Cancelled;
    }
    publish(
        &progress,
        EnrollProgress {
            code: CODE_TIMEOUT,
            username,
            message: "timeout".to_string(),
            image: None,
        },
    );
    EnrollOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{FaceInfo, StubFaceRecognizer};
    use crate::types::{FaceMatch, Image, Rect};
    use crossbeam_channel::unbounded;

    fn frame() -> Frame {
        Frame { image: Image::new(2, 2, vec![0; 12]), stamp_ns: 1 }
    }

    fn setup(
        faces: Vec<FaceInfo>,
        matches: Vec<FaceMatch>,
    ) -> (
        Arc<Mailbox<Frame>>,
        Arc<Mutex<dyn FaceRecognizer>>,
        Arc<Mutex<FaceLibrary>>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(Mutex::new(
            FaceLibrary::load(dir.path().join("faceinfo.yaml")).unwrap(),
        ));
        let recognizer: Arc<Mutex<dyn FaceRecognizer>> =
            Arc::new(Mutex::new(StubFaceRecognizer { faces, matches, fail: false }));
        (Arc::new(Mailbox::new()), recognizer, library, dir)
    }

    fn good_face() -> FaceInfo {
        FaceInfo { rect: Rect::new(0, 0, 40, 40), pose: [0.0; 3], features: vec![0.7; 8] }
    }

    #[test]
    fn test_session_accepts_good_face() {
        let (frames, recognizer, library, _dir) = setup(vec![good_face()], vec![]);
        let (tx, rx) = unbounded();
        library.lock().begin_enrollment("alice", false);

        let handle = spawn_session(
            "alice".into(),
            Arc::clone(&frames),
            recognizer,
            Arc::clone(&library),
            tx,
            Duration::from_secs(5),
        );
        frames.publish(frame());
        assert_eq!(handle.join(), EnrollOutcome::Accepted);

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.code, CODE_ACCEPTED);
        assert!(event.image.is_some());

        // The capture can now be confirmed.
        library.lock().confirm("alice", false).unwrap();
    }

    #[test]
    fn test_session_rejects_duplicate() {
        let duplicate = FaceMatch {
            rect: Rect::new(0, 0, 40, 40),
            id: "bob".into(),
            score: 0.9,
            match_score: 0.8,
            pose: [0.0; 3],
        };
        let (frames, recognizer, library, _dir) = setup(vec![good_face()], vec![duplicate]);
        let (tx, rx) = unbounded();

        let handle = spawn_session(
            "alice".into(),
            Arc::clone(&frames),
            recognizer,
            library,
            tx,
            Duration::from_secs(5),
        );
        frames.publish(frame());
        assert_eq!(handle.join(), EnrollOutcome::Rejected);
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.code, CODE_ALREADY_ENROLLED);
        assert_eq!(event.username, "bob");
    }

    #[test]
    fn test_session_times_out_without_frames() {
        let (frames, recognizer, library, _dir) = setup(vec![good_face()], vec![]);
        let (tx, rx) = unbounded();

        let handle = spawn_session(
            "alice".into(),
            frames,
            recognizer,
            library,
            tx,
            Duration::from_millis(300),
        );
        assert_eq!(handle.join(), EnrollOutcome::TimedOut);
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.code, CODE_TIMEOUT);
    }

    #[test]
    fn test_session_cancel() {
        let (frames, recognizer, library, _dir) = setup(vec![], vec![]);
        let (tx, _rx) = unbounded();

        let handle = spawn_session(
            "alice".into(),
            frames,
            recognizer,
            library,
            tx,
            Duration::from_secs(30),
        );
        handle.cancel();
        assert_eq!(handle.join(), EnrollOutcome::Cancelled);
    }

    #[test]
    fn test_bad_pose_reports_progress_and_keeps_waiting() {
        let bad = FaceInfo { rect: Rect::new(0, 0, 40, 40), pose: [80.0, 0.0, 0.0], features: vec![] };
        let (frames, recognizer, library, _dir) = setup(vec![bad], vec![]);
        let (tx, rx) = unbounded();

        let handle = spawn_session(
            "alice".into(),
            Arc::clone(&frames),
            recognizer,
            library,
            tx,
            Duration::from_millis(500),
        );
        frames.publish(frame());
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.code, PoseCheck::BadPose.code());
        assert_eq!(handle.join(), EnrollOutcome::TimedOut);
    }
}
