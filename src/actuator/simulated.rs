//! Simulated actuator for development hosts without lock hardware

use crate::actuator::traits::Actuator;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Logs transitions and remembers whether the lock is engaged
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    engaged: AtomicBool,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

impl Actuator for SimulatedActuator {
    fn engage(&self) -> Result<()> {
        if !self.engaged.swap(true, Ordering::SeqCst) {
            info!("[SIM] Lock released");
        }
        Ok(())
    }

    fn disengage(&self) -> Result<()> {
        if self.engaged.swap(false, Ordering::SeqCst) {
            info!("[SIM] Lock engaged");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}
