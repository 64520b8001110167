//! Per-stage activation slot.

use parking_lot::{Condvar, Mutex};

/// Wakes exactly one worker thread for one unit of work.
///
/// Invariant: at most one pending wakeup is outstanding. `wake` sets the
/// pending flag only if it was previously clear, so a manager can never
/// queue duplicate activations for a single frame.
pub struct StageSlot {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl StageSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the pending flag and wake the worker. Returns `true` if this call
    /// newly set the flag, `false` if a wakeup was already outstanding.
    pub fn wake(&self) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            return false;
        }
        *pending = true;
        self.cond.notify_one();
        true
    }

    /// Run `and_then` under the slot lock if this call newly set the pending
    /// flag. Used by the schedulers to couple the barrier increment to the
    /// activation (slot lock acquired before the barrier lock).
    pub fn wake_with<F: FnOnce()>(&self, and_then: F) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            return false;
        }
        and_then();
        *pending = true;
        self.cond.notify_one();
        true
    }

    /// Block until the pending flag is set, then clear it.
    pub fn wait_pending(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }
}

impl Default for StageSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wake_is_idempotent_until_consumed() {
        let slot = StageSlot::new();
        assert!(slot.wake());
        assert!(!slot.wake());
        slot.wait_pending();
        assert!(slot.wake());
    }

    #[test]
    fn test_wake_with_runs_only_on_first_wake() {
        let slot = StageSlot::new();
        let mut count = 0;
        assert!(slot.wake_with(|| count += 1));
        assert!(!slot.wake_with(|| count += 1));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_wait_blocks_until_wake() {
        let slot = Arc::new(StageSlot::new());
        let worker = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_pending())
        };
        thread::sleep(Duration::from_millis(20));
        slot.wake();
        worker.join().unwrap();
    }
}
