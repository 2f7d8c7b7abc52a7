//! Unlock Scheduler Module
//!
//! Turns validated unlock requests into exactly one eventual re-lock at the
//! latest requested deadline.

mod scheduler;

pub use scheduler::{SchedulerCommand, UnlockHandle, UnlockScheduler};
