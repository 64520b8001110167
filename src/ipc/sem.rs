//! RAII wrapper over a SysV semaphore set.

use std::io;
use std::ptr;
use std::time::Duration;

use anyhow::{bail, Result};

// The libc crate does not bind semtimedop; declare the glibc symbol directly.
extern "C" {
    fn semtimedop(
        semid: libc::c_int,
        sops: *mut libc::sembuf,
        nsops: libc::size_t,
        timeout: *const libc::timespec,
    ) -> libc::c_int;
}

/// A SysV semaphore set, removed on drop.
pub struct SemSet {
    id: i32,
}

impl SemSet {
    /// Create (or open) a set of `count` semaphores for `key`.
    pub fn create(key: i32, count: i32) -> Result<Self> {
        let id = unsafe { libc::semget(key, count, libc::IPC_CREAT | 0o666) };
        if id < 0 {
            bail!(
                "semget(key={:#x}, count={}) failed: {}",
                key,
                count,
                io::Error::last_os_error()
            );
        }
        Ok(Self { id })
    }

    /// Set the initial value of one semaphore in the set.
    pub fn set_value(&self, index: i32, value: i32) -> Result<()> {
        // SETVAL takes the value as the fourth argument; on Linux the int
        // member of semun is passed directly.
        let rc = unsafe { libc::semctl(self.id, index, libc::SETVAL, value) };
        if rc < 0 {
            bail!(
                "semctl(SETVAL, index={}, value={}) failed: {}",
                index,
                value,
                io::Error::last_os_error()
            );
        }
        Ok(())
    }

    fn op(&self, index: i32, delta: i16, timeout: Option<Duration>) -> Result<bool> {
        let mut sops = libc::sembuf {
            sem_num: index as u16,
            sem_op: delta,
            sem_flg: 0,
        };
        loop {
            let rc = match timeout {
                Some(t) => {
                    let ts = libc::timespec {
                        tv_sec: t.as_secs() as libc::time_t,
                        tv_nsec: t.subsec_nanos() as libc::c_long,
                    };
                    unsafe { semtimedop(self.id, &mut sops, 1, &ts) }
                }
                None => unsafe { libc::semop(self.id, &mut sops, 1) },
            };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) if timeout.is_some() => return Ok(false),
                _ => bail!("semop(index={}, delta={}) failed: {}", index, delta, err),
            }
        }
    }

    /// P operation: decrement, blocking until positive.
    pub fn wait(&self, index: i32) -> Result<()> {
        self.op(index, -1, None).map(|_| ())
    }

    /// P operation with a deadline. Returns `false` on timeout.
    pub fn wait_timeout(&self, index: i32, timeout: Duration) -> Result<bool> {
        self.op(index, -1, Some(timeout))
    }

    /// V operation: increment, waking one waiter.
    pub fn signal(&self, index: i32) -> Result<()> {
        self.op(index, 1, None).map(|_| ())
    }
}

impl Drop for SemSet {
    fn drop(&mut self) {
        unsafe {
            libc::semctl(self.id, 0, libc::IPC_RMID, ptr::null_mut::<libc::c_void>());
        }
    }
}
