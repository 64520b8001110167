//! Single-slot overwrite-on-publish mailbox.

use parking_lot::{Condvar, Mutex};

struct Slot<T> {
    value: Option<T>,
    fresh: bool,
}

/// Latest-value handoff between one producer and one blocking consumer.
///
/// `publish` overwrites the slot (latest-wins, frames are dropped under slow
/// consumption, never queued). `wait_fresh` blocks until a publish since the
/// last take, `latest` peeks without consuming freshness. `force_wake`
/// releases a blocked waiter without supplying a value so it can re-check
/// liveness during deactivation.
pub struct Mailbox<T: Clone> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { value: None, fresh: false }),
            cond: Condvar::new(),
        }
    }

    /// Overwrite the slot with a new value and wake the waiter.
    pub fn publish(&self, value: T) {
        let mut slot = self.slot.lock();
        slot.value = Some(value);
        slot.fresh = true;
        self.cond.notify_one();
    }

    /// Block until a fresh value is available, consume the freshness mark
    /// and return a copy. Returns `None` only after a `force_wake` with an
    /// empty slot.
    pub fn wait_fresh(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while !slot.fresh {
            self.cond.wait(&mut slot);
        }
        slot.fresh = false;
        slot.value.clone()
    }

    /// Like `wait_fresh`, but give up after `timeout`. `None` on timeout,
    /// `Some(None)` only after a `force_wake` with an empty slot. Used by
    /// the enrollment loop so its cancel flag stays responsive.
    pub fn wait_fresh_for(&self, timeout: std::time::Duration) -> Option<Option<T>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !slot.fresh {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                if slot.fresh {
                    break;
                }
                return None;
            }
        }
        slot.fresh = false;
        Some(slot.value.clone())
    }

    /// Copy of the most recent value without consuming freshness.
    pub fn latest(&self) -> Option<T> {
        self.slot.lock().value.clone()
    }

    /// Mark the slot fresh without changing its value, releasing a blocked
    /// `wait_fresh`. Used only on deactivation.
    pub fn force_wake(&self) {
        let mut slot = self.slot.lock();
        if !slot.fresh {
            slot.fresh = true;
            self.cond.notify_one();
        }
    }
}

impl<T: Clone> Default for Mailbox<T> {
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
    fn test_publish_overwrites() {
        let mbox = Mailbox::new();
        mbox.publish(1u32);
        mbox.publish(2u32);
        assert_eq!(mbox.wait_fresh(), Some(2));
    }

    #[test]
    fn test_latest_does_not_consume() {
        let mbox = Mailbox::new();
        mbox.publish(7u32);
        assert_eq!(mbox.latest(), Some(7));
        // Freshness still set, wait_fresh returns immediately.
        assert_eq!(mbox.wait_fresh(), Some(7));
        // Value survives consumption; only the freshness mark is cleared.
        assert_eq!(mbox.latest(), Some(7));
    }

    #[test]
    fn test_wait_blocks_until_publish() {
        let mbox = Arc::new(Mailbox::new());
        let consumer = {
            let mbox = Arc::clone(&mbox);
            thread::spawn(move || mbox.wait_fresh())
        };
        thread::sleep(Duration::from_millis(20));
        mbox.publish(42u32);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_force_wake_releases_empty_slot() {
        let mbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        let consumer = {
            let mbox = Arc::clone(&mbox);
            thread::spawn(move || mbox.wait_fresh())
        };
        thread::sleep(Duration::from_millis(20));
        mbox.force_wake();
        assert_eq!(consumer.join().unwrap(), None);
    }
}
