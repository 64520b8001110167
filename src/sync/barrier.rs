//! Completion barrier for the in-flight frame cycle.

use parking_lot::{Condvar, Mutex};

/// Counts how many activated stages have not yet reported completion.
///
/// A manager increments once per stage it activates; each worker decrements
/// exactly once per activation. Reaching zero is the sole publish trigger.
/// The count saturates at zero so a stray decrement during teardown can
/// never drive it negative.
pub struct CompletionBarrier {
    outstanding: Mutex<usize>,
    cond: Condvar,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            outstanding: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Record one newly activated stage.
    pub fn add(&self, n: usize) {
        *self.outstanding.lock() += n;
    }

    /// Record one completed stage. Returns `true` if the barrier reached
    /// zero, in which case the waiting manager has been notified.
    pub fn complete(&self) -> bool {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Run `merge` under the barrier lock, then decrement. Encodes the
    /// barrier-before-result lock order for workers that must update the
    /// shared result and the counter together.
    pub fn complete_with<F: FnOnce()>(&self, merge: F) -> bool {
        let mut outstanding = self.outstanding.lock();
        merge();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until every activated stage has completed.
    pub fn wait_zero(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding != 0 {
            self.cond.wait(&mut outstanding);
        }
    }

    /// Current outstanding count.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Zero the counter and release any waiter. Deactivation only.
    pub fn force_release(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = 0;
        self.cond.notify_all();
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increments_match_decrements() {
        let barrier = CompletionBarrier::new();
        barrier.add(3);
        assert!(!barrier.complete());
        assert!(!barrier.complete());
        assert!(barrier.complete());
        assert_eq!(barrier.outstanding(), 0);
    }

    #[test]
    fn test_never_negative() {
        let barrier = CompletionBarrier::new();
        assert!(barrier.complete());
        assert_eq!(barrier.outstanding(), 0);
    }

    #[test]
    fn test_wait_zero_with_workers() {
        let barrier = Arc::new(CompletionBarrier::new());
        barrier.add(4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.complete();
            }));
        }
        barrier.wait_zero();
        assert_eq!(barrier.outstanding(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_force_release_unblocks_waiter() {
        let barrier = Arc::new(CompletionBarrier::new());
        barrier.add(1);
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_zero())
        };
        barrier.force_release();
        waiter.join().unwrap();
    }

    #[test]
    fn test_complete_with_runs_merge_before_zero_check() {
        let barrier = CompletionBarrier::new();
        barrier.add(1);
        let mut merged = false;
        assert!(barrier.complete_with(|| merged = true));
        assert!(merged);
    }
}
