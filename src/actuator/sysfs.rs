//! GPIO actuator driven through sysfs-style value files
//!
//! The strike relay and the indicator LED are both plain output lines, so
//! engaging writes `1` to every configured line and disengaging writes `0`.

use crate::actuator::traits::Actuator;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Drives one or more GPIO output lines together
#[derive(Debug, Clone)]
pub struct SysfsActuator {
    lines: Vec<PathBuf>,
}

impl SysfsActuator {
    /// Create an actuator for the lock line and an optional indicator line
    pub fn new(lock_line: PathBuf, indicator_line: Option<PathBuf>) -> Self {
        let mut lines = vec![lock_line];
        lines.extend(indicator_line);
        Self { lines }
    }

    /// Paths of every line this actuator writes
    pub fn lines(&self) -> &[PathBuf] {
        &self.lines
    }

    fn write_all(&self, value: &str) -> Result<()> {
        // Every line is attempted even if an earlier one fails
        let mut failed = Vec::new();
        for line in &self.lines {
            if let Err(e) = write_line(line, value) {
                error!("[GPIO] Failed to write {} to {}: {}", value, line.display(), e);
                failed.push(line.display().to_string());
            } else {
                debug!("[GPIO] {} <- {}", line.display(), value);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("GPIO write failed on: {}", failed.join(", ")))
        }
    }
}

fn write_line(path: &Path, value: &str) -> std::io::Result<()> {
    std::fs::write(path, value)
}

impl Actuator for SysfsActuator {
    fn engage(&self) -> Result<()> {
        self.write_all("1")
    }

    fn disengage(&self) -> Result<()> {
        self.write_all("0")
    }

    fn name(&self) -> &'static str {
        "GPIO"
    }
}
