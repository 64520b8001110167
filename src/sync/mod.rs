//! Thread-coordination primitives used by the scheduler.
//!
//! Each primitive pairs a `parking_lot` mutex with a condvar and is owned by
//! exactly one concern: `Mailbox` hands the newest frame to a consumer,
//! `StageSlot` wakes one worker for one unit of work, `CompletionBarrier`
//! counts outstanding stages for the in-flight cycle.

mod barrier;
mod mailbox;
mod stage_slot;

pub use barrier::CompletionBarrier;
pub use mailbox::Mailbox;
pub use stage_slot::StageSlot;
