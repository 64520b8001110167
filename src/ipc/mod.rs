//! OS IPC boundary with the external camera process.
//!
//! The camera deposits timestamped frames into a SysV shared-memory region
//! guarded by a 3-semaphore handshake (mutex / empty / full). Everything raw
//! lives behind RAII wrappers: resources are acquired at configure time and
//! released on every exit path, including a failure mid-configuration.

mod frame_channel;
mod sem;
mod shm;

pub use frame_channel::{FrameChannel, FrameSource};
pub use sem::SemSet;
pub use shm::SharedMemory;
