//! Actuator Module
//!
//! Drivers for the physical lock mechanism. Every driver exposes the same
//! idempotent engage/disengage capability so the scheduler never needs to
//! know which hardware it is talking to.

mod simulated;
mod sysfs;
mod traits;

pub use simulated::SimulatedActuator;
pub use sysfs::SysfsActuator;
pub use traits::Actuator;
