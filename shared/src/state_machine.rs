//! Lock State Machine
//!
//! Decides when the door re-locks given a stream of overlapping unlock
//! requests. The door stays open until the latest requested deadline and a
//! deferred check only re-locks if it was armed for the current deadline.
//!
//! The machine is generic over the instant type so the firmware can drive it
//! with `tokio::time::Instant` while tests use `std::time::Instant`.

use std::ops::Add;
use std::time::Duration;

/// Result of applying an unlock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome<I> {
    /// Door was locked and is now unlocked until `deadline`
    Unlocked { deadline: I },
    /// Door was already unlocked; the deadline moved later
    Extended { deadline: I },
    /// Door was already unlocked until a later (or equal) deadline, kept as is
    Retained { deadline: I },
}

impl<I: Copy> ExtendOutcome<I> {
    /// The deadline a deferred check must be armed for, if any
    pub fn arm_for(&self) -> Option<I> {
        match *self {
            ExtendOutcome::Unlocked { deadline } | ExtendOutcome::Extended { deadline } => {
                Some(deadline)
            }
            ExtendOutcome::Retained { .. } => None,
        }
    }

    pub fn deadline(&self) -> I {
        match *self {
            ExtendOutcome::Unlocked { deadline }
            | ExtendOutcome::Extended { deadline }
            | ExtendOutcome::Retained { deadline } => deadline,
        }
    }
}

/// Result of a deferred check firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckOutcome {
    /// A later request moved the deadline; another check owns the re-lock
    Stale,
    /// The check matches but the door is already locked
    AlreadyLocked,
    /// The check fired early; it must be armed again
    NotYetDue,
    /// The window is over: disengage the actuator
    Relock,
}

/// Lock/unlock state and the active deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState<I> {
    unlocked: bool,
    deadline: I,
    armed_for: Option<I>,
}

impl<I> LockState<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create a locked state whose deadline has already passed
    pub fn new(now: I) -> Self {
        Self {
            unlocked: false,
            deadline: now,
            armed_for: None,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn deadline(&self) -> I {
        self.deadline
    }

    /// Deadline of the most recently armed check, if the door is unlocked
    pub fn armed_for(&self) -> Option<I> {
        self.armed_for
    }

    /// Apply an unlock request of `duration` arriving at `now`.
    ///
    /// The stored deadline never moves earlier. The caller engages the
    /// actuator for every outcome.
    pub fn extend(&mut self, now: I, duration: Duration) -> ExtendOutcome<I> {
        let candidate = now + duration;

        if !self.unlocked {
            self.unlocked = true;
            self.deadline = candidate.max(self.deadline);
            self.armed_for = Some(self.deadline);
            return ExtendOutcome::Unlocked {
                deadline: self.deadline,
            };
        }

        if candidate > self.deadline {
            self.deadline = candidate;
            self.armed_for = Some(candidate);
            ExtendOutcome::Extended {
                deadline: candidate,
            }
        } else {
            ExtendOutcome::Retained {
                deadline: self.deadline,
            }
        }
    }

    /// Apply a deferred check that was armed for `fired_for`
    pub fn recheck(&mut self, fired_for: I, now: I) -> RecheckOutcome {
        if fired_for != self.deadline {
            return RecheckOutcome::Stale;
        }
        if !self.unlocked {
            return RecheckOutcome::AlreadyLocked;
        }
        if now < self.deadline {
            return RecheckOutcome::NotYetDue;
        }

        self.unlocked = false;
        self.armed_for = None;
        RecheckOutcome::Relock
    }
}

impl<I> LockState<I>
where
    I: Copy + Ord + std::ops::Sub<I, Output = Duration>,
{
    /// Time left in the current window (zero when locked or overdue)
    pub fn remaining(&self, now: I) -> Duration {
        if self.unlocked && self.deadline > now {
            self.deadline - now
        } else {
            Duration::ZERO
        }
    }
}
