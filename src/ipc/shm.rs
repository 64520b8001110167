//! RAII wrapper over a SysV shared-memory segment.

use std::io;
use std::ptr;

use anyhow::{bail, Context, Result};

/// An attached SysV shared-memory segment, detached and removed on drop.
pub struct SharedMemory {
    id: i32,
    addr: *mut u8,
    size: usize,
}

// The raw pointer is only dereferenced through `read_into`, which the frame
// channel serializes with the semaphore handshake.
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Create (or open) and attach the segment for `key`.
    pub fn attach(key: i32, size: usize) -> Result<Self> {
        let id = unsafe { libc::shmget(key, size, libc::IPC_CREAT | 0o666) };
        if id < 0 {
            bail!(
                "shmget(key={:#x}, size={}) failed: {}",
                key,
                size,
                io::Error::last_os_error()
            );
        }
        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr == usize::MAX as *mut libc::c_void {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("shmat(id={id}) failed"));
        }
        Ok(Self { id, addr: addr as *mut u8, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the segment.
    ///
    /// Must only be called while the handshake mutex is held; the producer
    /// writes the same region.
    pub fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() > self.size {
            bail!(
                "shared memory read out of range: {}+{} > {}",
                offset,
                buf.len(),
                self.size
            );
        }
        unsafe {
            ptr::copy_nonoverlapping(self.addr.add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `buf` into the segment starting at `offset`. Producer side of
    /// the handshake; used by the demo feeder and tests.
    pub fn write_from(&self, offset: usize, buf: &[u8]) -> Result<()> {
        if offset + buf.len() > self.size {
            bail!(
                "shared memory write out of range: {}+{} > {}",
                offset,
                buf.len(),
                self.size
            );
        }
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.addr.add(offset), buf.len());
        }
        Ok(())
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr as *const libc::c_void);
            libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut());
        }
    }
}
