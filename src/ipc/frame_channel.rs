//! Consumer side of the camera frame handshake.

use std::time::Duration;

use anyhow::Result;

use crate::config::VisionConfig;
use crate::types::{Frame, Image};

use super::{SemSet, SharedMemory};

/// Semaphore indices within the handshake set.
const SEM_MUTEX: i32 = 0;
const SEM_EMPTY: i32 = 1;
const SEM_FULL: i32 = 2;

/// Anything that can yield camera frames to the intake thread.
///
/// `next_frame` blocks at most `timeout`; `Ok(None)` means no frame arrived
/// in that window, which lets the caller poll its liveness flag. `Err` is a
/// resource fault and stops the pipeline.
pub trait FrameSource: Send {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;
}

/// The shared-memory frame channel: a single slot the camera overwrites and
/// this side copies out. Latest-frame-wins, never at-least-once.
pub struct FrameChannel {
    shm: SharedMemory,
    sems: SemSet,
    width: u32,
    height: u32,
}

impl FrameChannel {
    /// Attach shared memory and the semaphore set, initializing the
    /// handshake counters (mutex=1, empty=1, full=0).
    pub fn attach(config: &VisionConfig) -> Result<Self> {
        let shm = SharedMemory::attach(config.shm_key, config.shm_size())?;
        let sems = SemSet::create(config.sem_key, 3)?;
        sems.set_value(SEM_MUTEX, 1)?;
        sems.set_value(SEM_EMPTY, 1)?;
        sems.set_value(SEM_FULL, 0)?;
        Ok(Self {
            shm,
            sems,
            width: config.image_width,
            height: config.image_height,
        })
    }

    /// Producer protocol: wait-empty, wait-mutex, write stamp+image,
    /// signal-mutex, signal-full. Used by the demo feeder and tests; the
    /// real producer is the camera process.
    pub fn deposit(&self, frame: &Frame) -> Result<()> {
        self.sems.wait(SEM_EMPTY)?;
        self.sems.wait(SEM_MUTEX)?;
        self.shm.write_from(0, &frame.stamp_ns.to_le_bytes())?;
        self.shm.write_from(8, &frame.image.data)?;
        self.sems.signal(SEM_MUTEX)?;
        self.sems.signal(SEM_FULL)?;
        Ok(())
    }
}

impl FrameSource for FrameChannel {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        // Consumer protocol: wait-full, wait-mutex, copy out, signal-mutex,
        // signal-empty. The bounded wait on `full` keeps the intake thread
        // responsive to deactivation; the inner waits are handshake-latency
        // only and never block the producer longer than the copy.
        if !self.sems.wait_timeout(SEM_FULL, timeout)? {
            return Ok(None);
        }
        self.sems.wait(SEM_MUTEX)?;

        let mut stamp_buf = [0u8; 8];
        self.shm.read_into(0, &mut stamp_buf)?;
        let mut data = vec![0u8; Image::byte_len(self.width, self.height)];
        self.shm.read_into(8, &mut data)?;

        self.sems.signal(SEM_MUTEX)?;
        self.sems.signal(SEM_EMPTY)?;

        Ok(Some(Frame {
            image: Image::new(self.width, self.height, data),
            stamp_ns: u64::from_le_bytes(stamp_buf),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config() -> VisionConfig {
        // Process-unique keys so parallel test runs do not collide.
        let pid = std::process::id() as i32;
        VisionConfig {
            shm_key: 0x7e00_0000 | (pid & 0xffff),
            sem_key: 0x7f00_0000 | (pid & 0xffff),
            image_width: 4,
            image_height: 2,
            history_depth: 6,
            enroll_timeout: Duration::from_secs(1),
            library_path: PathBuf::from("/tmp/unused.yaml"),
        }
    }

    #[test]
    fn test_deposit_then_acquire() {
        let config = test_config();
        let mut channel = FrameChannel::attach(&config).unwrap();
        let frame = Frame {
            image: Image::new(4, 2, vec![9u8; Image::byte_len(4, 2)]),
            stamp_ns: 123_456_789,
        };
        channel.deposit(&frame).unwrap();
        let got = channel
            .next_frame(Duration::from_millis(200))
            .unwrap()
            .expect("frame should be available");
        assert_eq!(got.stamp_ns, 123_456_789);
        assert_eq!(got.image.data, frame.image.data);
    }

    #[test]
    fn test_acquire_times_out_when_empty() {
        let mut config = test_config();
        config.shm_key ^= 0x0001_0000;
        config.sem_key ^= 0x0001_0000;
        let mut channel = FrameChannel::attach(&config).unwrap();
        let got = channel.next_frame(Duration::from_millis(50)).unwrap();
        assert!(got.is_none());
    }
}
