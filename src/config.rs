//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Static configuration for the vision pipeline.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// SysV IPC key of the shared-memory frame region.
    pub shm_key: i32,
    /// SysV IPC key of the 3-semaphore handshake set.
    pub sem_key: i32,
    /// Camera frame width in pixels.
    pub image_width: u32,
    /// Camera frame height in pixels.
    pub image_height: u32,
    /// Capacity of the body-results history ring.
    pub history_depth: usize,
    /// Deadline for one face-enrollment capture session.
    pub enroll_timeout: Duration,
    /// On-disk face library snapshot.
    pub library_path: PathBuf,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            shm_key: 0x5641_0001,
            sem_key: 0x5641_0002,
            image_width: 640,
            image_height: 480,
            history_depth: 6,
            enroll_timeout: Duration::from_secs(40),
            library_path: PathBuf::from("/var/lib/vision-manager/faceinfo.yaml"),
        }
    }
}

impl VisionConfig {
    /// Byte size of the shared-memory region: 8-byte timestamp + image.
    pub fn shm_size(&self) -> usize {
        8 + crate::types::Image::byte_len(self.image_width, self.image_height)
    }
}
