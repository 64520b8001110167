//! Top-level lifecycle controller and control-operation surface.
//!
//! `VisionManager` owns every thread and IPC resource of the pipeline and
//! walks the `Unconfigured -> Inactive -> Active -> Inactive -> Unconfigured`
//! state machine, plus a terminal `Shutdown` reachable from anywhere.
//! Thread teardown order is the liveness-critical part: clear the alive
//! flag, force-wake every blocking point, then join producer-side first,
//! managers second, workers last.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::VisionConfig;
use crate::enrollment::{
    spawn_session, EnrollProgress, EnrollmentHandle, FaceLibrary,
};
use crate::ipc::{FrameChannel, FrameSource};
use crate::providers::ProviderSet;
use crate::result::{FrameResult, OutputBus, OutputTaps};
use crate::scheduler::{
    body_loop, face_loop, focus_loop, gesture_loop, intake_loop, keypoints_loop, phase1_loop,
    phase2_loop, reid_loop, PipelineShared,
};
use crate::types::{Rect, StageKind, TrackingStatus};

/// IoU threshold for resolving a tracking-target region against the
/// body-results history.
const TRACK_MATCH_IOU: f64 = 0.5;

/// Lifecycle states of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No resources held; `configure` is the only legal transition.
    Unconfigured,
    /// Configured but not processing; threads are not running.
    Inactive,
    /// Threads running, frames flowing.
    Active,
    /// Terminal; all resources released.
    Shutdown,
}

/// A face-management command from the external caller.
#[derive(Debug, Clone)]
pub enum FaceCommand {
    Add { username: String, is_host: bool },
    Cancel,
    Confirm { username: String, is_host: bool },
    UpdateId { ori_name: String, new_name: String },
    Delete { username: String },
    ListAll,
}

/// Synchronous outcome of a face-management command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceCommandOutcome {
    Accepted,
    Listing(String),
    /// A required argument was empty or missing.
    InvalidArgs,
    /// The library or enrollment machinery rejected the command.
    Failed(String),
}

struct PipelineThreads {
    intake: JoinHandle<()>,
    managers: Vec<(&'static str, JoinHandle<()>)>,
    workers: Vec<(StageKind, JoinHandle<()>)>,
}

/// The perception orchestrator.
pub struct VisionManager {
    config: VisionConfig,
    state: LifecycleState,
    providers: Option<ProviderSet>,
    library: Option<Arc<Mutex<FaceLibrary>>>,
    source: Option<Arc<Mutex<Box<dyn FrameSource>>>>,
    shared: Option<Arc<PipelineShared>>,
    taps: Option<OutputTaps>,
    threads: Option<PipelineThreads>,
    enrollment: Option<EnrollmentHandle>,
}

impl VisionManager {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Unconfigured,
            providers: None,
            library: None,
            source: None,
            shared: None,
            taps: None,
            threads: None,
            enrollment: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Attach the shared-memory frame channel and configure with it.
    pub fn configure(&mut self, providers: ProviderSet) -> Result<()> {
        let channel = FrameChannel::attach(&self.config)
            .context("attaching camera frame channel")?;
        self.configure_with_source(providers, Box::new(channel))
    }

    /// Configure with an injected frame source (tests, demo feeds).
    ///
    /// Any failure leaves the state `Unconfigured` with every partially
    /// acquired resource dropped.
    pub fn configure_with_source(
        &mut self,
        providers: ProviderSet,
        source: Box<dyn FrameSource>,
    ) -> Result<()> {
        if self.state != LifecycleState::Unconfigured {
            bail!("configure: invalid in state {:?}", self.state);
        }
        info!("configuring vision manager");

        let library = FaceLibrary::load(self.config.library_path.clone())
            .context("loading face library")?;

        let (bus, taps) = OutputBus::new();
        self.shared = Some(PipelineShared::new(self.config.history_depth, bus));
        self.taps = Some(taps);
        self.library = Some(Arc::new(Mutex::new(library)));
        self.providers = Some(providers);
        self.source = Some(Arc::new(Mutex::new(source)));
        self.state = LifecycleState::Inactive;
        info!("configure complete");
        Ok(())
    }

    /// Start the camera stream and spawn every pipeline thread.
    pub fn activate(&mut self) -> Result<()> {
        if self.state != LifecycleState::Inactive {
            bail!("activate: invalid in state {:?}", self.state);
        }
        info!("activating vision manager");

        let providers = self.providers.as_ref().expect("configured").clone();
        providers
            .camera
            .start_stream()
            .context("starting camera stream")?;

        let shared = Arc::clone(self.shared.as_ref().expect("configured"));
        shared.set_alive(true);
        shared.set_tracking_status(TrackingStatus::Selecting);
        match self.spawn_threads(&shared, &providers) {
            Ok(threads) => self.threads = Some(threads),
            Err(e) => {
                // Threads spawned before the failure observe the cleared
                // flag and exit; the transition fails and we stay Inactive.
                shared.set_alive(false);
                shared.force_wake_all();
                for kind in [
                    StageKind::Body,
                    StageKind::Face,
                    StageKind::Focus,
                    StageKind::Gesture,
                    StageKind::Keypoints,
                    StageKind::Reid,
                ] {
                    shared.slots.get(kind).wake();
                }
                if let Err(stop) = providers.camera.stop_stream() {
                    warn!(error = %stop, "stopping camera after failed activation");
                }
                return Err(e);
            }
        }
        self.state = LifecycleState::Active;
        info!("activate complete");
        Ok(())
    }

    fn spawn_threads(
        &self,
        shared: &Arc<PipelineShared>,
        providers: &ProviderSet,
    ) -> Result<PipelineThreads> {
        let named = |name: &str| thread::Builder::new().name(name.to_string());
        let library = Arc::clone(self.library.as_ref().expect("configured"));
        let source = Arc::clone(self.source.as_ref().expect("configured"));

        let intake = {
            let shared = Arc::clone(shared);
            named("frame-intake")
                .spawn(move || intake_loop(shared, source))
                .context("spawning intake thread")?
        };

        let managers = vec![
            ("phase1-manager", {
                let shared = Arc::clone(shared);
                named("phase1-manager")
                    .spawn(move || phase1_loop(shared))
                    .context("spawning phase-1 manager")?
            }),
            ("phase2-manager", {
                let shared = Arc::clone(shared);
                named("phase2-manager")
                    .spawn(move || phase2_loop(shared))
                    .context("spawning phase-2 manager")?
            }),
        ];

        let workers = vec![
            (StageKind::Body, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.body));
                named("worker-body")
                    .spawn(move || body_loop(shared, p))
                    .context("spawning body worker")?
            }),
            (StageKind::Face, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.face));
                named("worker-face")
                    .spawn(move || face_loop(shared, p, library))
                    .context("spawning face worker")?
            }),
            (StageKind::Focus, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.focus));
                named("worker-focus")
                    .spawn(move || focus_loop(shared, p))
                    .context("spawning focus worker")?
            }),
            (StageKind::Gesture, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.gesture));
                named("worker-gesture")
                    .spawn(move || gesture_loop(shared, p))
                    .context("spawning gesture worker")?
            }),
            (StageKind::Keypoints, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.keypoints));
                named("worker-keypoints")
                    .spawn(move || keypoints_loop(shared, p))
                    .context("spawning keypoints worker")?
            }),
            (StageKind::Reid, {
                let (shared, p) = (Arc::clone(shared), Arc::clone(&providers.reid));
                named("worker-reid")
                    .spawn(move || reid_loop(shared, p))
                    .context("spawning reid worker")?
            }),
        ];

        Ok(PipelineThreads { intake, managers, workers })
    }

    /// Stop processing: drain threads in dependency order, reset tracker
    /// state, and stop the camera stream.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.state != LifecycleState::Active {
            bail!("deactivate: invalid in state {:?}", self.state);
        }
        info!("deactivating vision manager");

        let shared = Arc::clone(self.shared.as_ref().expect("configured"));
        shared.set_alive(false);
        // Every blocked wait point must be released before the join on it,
        // or a thread could wait forever on a condition nobody signals.
        shared.force_wake_all();

        if let Some(threads) = self.threads.take() {
            if threads.intake.join().is_err() {
                warn!("intake thread panicked");
            }
            info!("intake thread joined");

            for (name, handle) in threads.managers {
                // Managers may be blocked on a mailbox or barrier filled
                // before the flag cleared; re-wake until each joins.
                shared.force_wake_all();
                if handle.join().is_err() {
                    warn!(thread = name, "manager thread panicked");
                }
                info!(thread = name, "manager thread joined");
            }

            for (kind, handle) in threads.workers {
                shared.slots.get(kind).wake();
                if handle.join().is_err() {
                    warn!(stage = ?kind, "worker thread panicked");
                }
                info!(stage = ?kind, "worker thread joined");
            }
        }

        if let Some(session) = self.enrollment.take() {
            session.cancel();
            session.join();
            info!("enrollment session joined");
        }

        let providers = self.providers.as_ref().expect("configured");
        providers.reset_trackers();
        shared.flags.clear_all();
        self.state = LifecycleState::Inactive;

        providers
            .camera
            .stop_stream()
            .context("stopping camera stream")?;
        info!("deactivate complete");
        Ok(())
    }

    /// Release providers, IPC and channel endpoints; back to `Unconfigured`.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.state != LifecycleState::Inactive {
            bail!("cleanup: invalid in state {:?}", self.state);
        }
        info!("cleaning up vision manager");
        self.release_all();
        self.state = LifecycleState::Unconfigured;
        Ok(())
    }

    /// Unconditional teardown, legal from any state including mid-configure
    /// failures. Terminal.
    pub fn shutdown(&mut self) {
        info!("shutting down vision manager");
        if self.state == LifecycleState::Active {
            if let Err(e) = self.deactivate() {
                warn!(error = %e, "deactivate during shutdown failed");
            }
        }
        self.release_all();
        self.state = LifecycleState::Shutdown;
    }

    fn release_all(&mut self) {
        self.threads = None;
        self.enrollment = None;
        self.providers = None;
        self.library = None;
        // Dropping the source detaches shared memory and removes the
        // semaphore set via the RAII wrappers.
        self.source = None;
        self.shared = None;
        self.taps = None;
    }

    // --- published output streams -------------------------------------

    pub fn results(&self) -> Option<Receiver<FrameResult>> {
        self.taps.as_ref().map(|t| t.results.clone())
    }

    pub fn status_events(&self) -> Option<Receiver<TrackingStatus>> {
        self.taps.as_ref().map(|t| t.status.clone())
    }

    pub fn enrollment_events(&self) -> Option<Receiver<EnrollProgress>> {
        self.taps.as_ref().map(|t| t.enroll.clone())
    }

    pub fn tracking_status(&self) -> Option<TrackingStatus> {
        self.shared.as_ref().map(|s| s.tracking_status())
    }

    // --- control operations -------------------------------------------

    /// Enable or disable one stage, effective from the next frame cycle.
    /// Enabling face recognition reloads the library snapshot from disk.
    pub fn set_algorithm_enabled(&mut self, kind: StageKind, enabled: bool) -> Result<()> {
        let shared = match self.shared.as_ref() {
            Some(s) => s,
            None => bail!("set_algorithm_enabled: not configured"),
        };
        if kind == StageKind::Face && enabled {
            match FaceLibrary::load(self.config.library_path.clone()) {
                Ok(fresh) => {
                    *self.library.as_ref().expect("configured").lock() = fresh;
                }
                Err(e) => warn!(error = %e, "face library reload failed, keeping previous"),
            }
        }
        info!(stage = ?kind, enabled, "stage enablement changed");
        shared.flags.set(kind, enabled);
        Ok(())
    }

    /// Batched enable/disable; always succeeds for recognized stages.
    pub fn apply_algorithm_request(
        &mut self,
        enable: &[StageKind],
        disable: &[StageKind],
    ) -> Result<()> {
        for kind in enable {
            self.set_algorithm_enabled(*kind, true)?;
        }
        for kind in disable {
            self.set_algorithm_enabled(*kind, false)?;
        }
        Ok(())
    }

    /// Resolve a caller-supplied region to a tracking target.
    ///
    /// With reid enabled the region is matched against the body-results
    /// history (best IoU >= 0.5, most recent first) and handed to the reid
    /// provider; otherwise, with focus enabled, the latest frame and the
    /// region go straight to the focus tracker. Success flips the tracking
    /// status to `Tracking`; any failure leaves it untouched.
    pub fn set_tracking_target(&mut self, region: Rect) -> Result<()> {
        let shared = match self.shared.as_ref() {
            Some(s) => s,
            None => bail!("set_tracking_target: not configured"),
        };
        let providers = self.providers.as_ref().expect("configured");
        info!(?region, "tracking target requested");

        if shared.flags.enabled(StageKind::Reid) {
            let (rect, frame) = shared
                .history
                .find_match(&region, TRACK_MATCH_IOU)
                .context("no recent body detection matches the region")?;
            providers
                .reid
                .lock()
                .set_target(&frame.image, rect)
                .context("setting reid tracker target")?;
        } else if shared.flags.enabled(StageKind::Focus) {
            let frame = shared
                .frames
                .latest()
                .context("no frame available to set focus target")?;
            providers
                .focus
                .lock()
                .set_target(&frame.image, region)
                .context("setting focus tracker target")?;
        } else {
            bail!("tracking target requires the reid or focus stage enabled");
        }

        shared.set_tracking_status(TrackingStatus::Tracking);
        Ok(())
    }

    /// Handle one face-management command synchronously. Argument problems
    /// are reported as `InvalidArgs` without touching any pipeline state.
    pub fn face_command(&mut self, command: FaceCommand) -> FaceCommandOutcome {
        let library = match self.library.as_ref() {
            Some(l) => Arc::clone(l),
            None => return FaceCommandOutcome::Failed("not configured".to_string()),
        };
        info!(?command, "face command received");

        match command {
            FaceCommand::Add { username, is_host } => {
                if username.is_empty() {
                    return FaceCommandOutcome::InvalidArgs;
                }
                if self.enrollment.as_ref().is_some_and(|s| !s.is_finished()) {
                    return FaceCommandOutcome::Failed(
                        "an enrollment session is already running".to_string(),
                    );
                }
                let shared = match self.shared.as_ref() {
                    Some(s) => s,
                    None => return FaceCommandOutcome::Failed("not configured".to_string()),
                };
                let providers = self.providers.as_ref().expect("configured");
                library.lock().begin_enrollment(&username, is_host);
                let session = spawn_session(
                    username,
                    Arc::clone(&shared.enroll_frames),
                    Arc::clone(&providers.face),
                    library,
                    shared.bus.enroll.clone(),
                    self.config.enroll_timeout,
                );
                self.enrollment = Some(session);
                FaceCommandOutcome::Accepted
            }
            FaceCommand::Cancel => {
                if let Some(session) = self.enrollment.take() {
                    session.cancel();
                    session.join();
                }
                library.lock().cancel_enrollment();
                FaceCommandOutcome::Accepted
            }
            FaceCommand::Confirm { username, is_host } => {
                if username.is_empty() {
                    return FaceCommandOutcome::InvalidArgs;
                }
                match library.lock().confirm(&username, is_host) {
                    Ok(()) => FaceCommandOutcome::Accepted,
                    Err(e) => FaceCommandOutcome::Failed(e.to_string()),
                }
            }
            FaceCommand::UpdateId { ori_name, new_name } => {
                if ori_name.is_empty() || new_name.is_empty() {
                    return FaceCommandOutcome::InvalidArgs;
                }
                match library.lock().update_id(&ori_name, &new_name) {
                    Ok(()) => FaceCommandOutcome::Accepted,
                    Err(e) => FaceCommandOutcome::Failed(e.to_string()),
                }
            }
            FaceCommand::Delete { username } => {
                if username.is_empty() {
                    return FaceCommandOutcome::InvalidArgs;
                }
                match library.lock().delete(&username) {
                    Ok(()) => FaceCommandOutcome::Accepted,
                    Err(e) => FaceCommandOutcome::Failed(e.to_string()),
                }
            }
            FaceCommand::ListAll => FaceCommandOutcome::Listing(library.lock().list_all()),
        }
    }
}

impl Drop for VisionManager {
    fn drop(&mut self) {
        if self.state != LifecycleState::Shutdown {
            self.shutdown();
        }
    }
}
