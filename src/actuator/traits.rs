//! Actuator trait abstraction for pluggable lock drivers

use anyhow::Result;

/// The lock mechanism: engaged means the door is held unlocked.
///
/// Both operations are idempotent and side-effect only.
pub trait Actuator: Send + Sync {
    /// Release the lock
    fn engage(&self) -> Result<()>;

    /// Return to the locked position
    fn disengage(&self) -> Result<()>;

    /// Human-readable name for this driver
    fn name(&self) -> &'static str;
}
