//! Demo runner: stub providers, an in-process camera feeder, and a short
//! bounded run of the full pipeline.
//!
//! Usage: `vision-manager [seconds]` (default 5). With `--shm` the intake
//! attaches the real SysV frame channel instead of feeding itself.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vision_manager::ipc::FrameChannel;
use vision_manager::providers::{ProviderSet, StubBodyDetector};
use vision_manager::types::{BodyDetection, Frame, Image, Rect};
use vision_manager::{StageKind, VisionConfig, VisionManager};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let use_shm = args.iter().any(|a| a == "--shm");
    let seconds: u64 = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .and_then(|a| a.parse().ok())
        .unwrap_or(5);

    let config = VisionConfig::default();

    // Stub providers with one canned detection so the demo publishes
    // non-empty results.
    let mut providers = ProviderSet::stubs();
    providers.body = Arc::new(Mutex::new(StubBodyDetector {
        detections: vec![BodyDetection {
            rect: Rect::new(100, 80, 120, 240),
            score: 0.92,
            reid: None,
        }],
        fail: false,
    }));

    let mut manager = VisionManager::new(config.clone());
    let feeder = if use_shm {
        manager.configure(providers)?;
        None
    } else {
        // Feed the shared-memory channel from a local thread standing in
        // for the camera process.
        let channel = FrameChannel::attach(&config)?;
        manager.configure(providers)?;
        Some(spawn_feeder(channel, &config, seconds))
    };

    manager.set_algorithm_enabled(StageKind::Body, true)?;
    manager.activate()?;

    let results = manager.results().expect("configured");
    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    let mut published = 0usize;
    while std::time::Instant::now() < deadline {
        match results.recv_timeout(Duration::from_millis(200)) {
            Ok(result) => {
                published += 1;
                info!(
                    stamp_ns = result.stamp_ns,
                    bodies = result.bodies.len(),
                    "cycle result"
                );
            }
            Err(_) => continue,
        }
    }
    info!(published, "run complete");

    manager.deactivate()?;
    manager.cleanup()?;
    manager.shutdown();
    if let Some(handle) = feeder {
        let _ = handle.join();
    }
    Ok(())
}

/// Deposit synthetic frames at ~20 Hz for the duration of the run.
fn spawn_feeder(
    channel: FrameChannel,
    config: &VisionConfig,
    seconds: u64,
) -> thread::JoinHandle<()> {
    let width = config.image_width;
    let height = config.image_height;
    thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
        let mut stamp_ns: u64 = 0;
        while std::time::Instant::now() < deadline {
            let frame = Frame {
                image: Image::new(width, height, vec![0u8; Image::byte_len(width, height)]),
                stamp_ns,
            };
            if channel.deposit(&frame).is_err() {
                break;
            }
            stamp_ns += 50_000_000;
            thread::sleep(Duration::from_millis(50));
        }
    })
}
