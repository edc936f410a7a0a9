//! Bus voltage / current monitor
//!
//! The INA219 on the hat is bound by the kernel `ina2xx` hwmon driver, which
//! exposes the bus voltage as `in1_input` (mV) and the current as
//! `curr1_input` (mA). Power is always derived here from the rounded
//! voltage and current rather than taken from `power1_input` (µW), so the
//! reported triple is self-consistent.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::constants::board;
use crate::data::PowerReading;
use crate::error::{PiPowerError, Result};
use crate::hw::sysfs;
use crate::hw::PowerSource;

/// Millivolts per volt
const MV_PER_V: f64 = 1000.0;

/// ina2xx hwmon device
pub struct HwmonPowerMonitor {
    root: PathBuf,
    device: Option<PathBuf>,
}

impl HwmonPowerMonitor {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf(), device: None }
    }
}

impl PowerSource for HwmonPowerMonitor {
    fn probe(&mut self) -> Result<()> {
        let (dir, chip) = sysfs::find_device_by_name(&self.root, board::POWER_MONITOR_CHIPS)
            .ok_or_else(|| {
                PiPowerError::PowerMonitorUnavailable(format!(
                    "no {} device under {}",
                    board::POWER_MONITOR_CHIPS.join("/"),
                    self.root.display()
                ))
            })?;
        // One sample proves the driver is bound and answering
        sysfs::read_number::<f64>(&dir.join("in1_input"))
            .map_err(|e| PiPowerError::PowerMonitorUnavailable(e.to_string()))?;
        info!(chip = %chip, path = %dir.display(), "Found power monitor");
        self.device = Some(dir);
        Ok(())
    }

    fn read(&mut self) -> Result<PowerReading> {
        let dir = self
            .device
            .as_ref()
            .ok_or_else(|| PiPowerError::PowerMonitorUnavailable("not probed".into()))?;
        let millivolts: f64 = sysfs::read_number(&dir.join("in1_input"))
            .map_err(|e| PiPowerError::PowerMonitorUnavailable(e.to_string()))?;
        let milliamps: f64 = sysfs::read_number(&dir.join("curr1_input"))
            .map_err(|e| PiPowerError::PowerMonitorUnavailable(e.to_string()))?;
        Ok(PowerReading::new(millivolts / MV_PER_V, milliamps))
    }
}

/// Presence-tracking wrapper: probed once at initialize, and once found
/// absent every read fails fast without touching the device.
pub struct PowerMonitor {
    source: Box<dyn PowerSource>,
    available: bool,
}

impl PowerMonitor {
    pub fn new(source: Box<dyn PowerSource>) -> Self {
        Self { source, available: false }
    }

    /// Probe the device, logging the outcome once
    pub fn initialize(&mut self) -> bool {
        self.available = match self.source.probe() {
            Ok(()) => true,
            Err(e) => {
                warn!("Power monitor absent, power will be reported as null: {}", e);
                false
            }
        };
        self.available
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn read(&mut self) -> Result<PowerReading> {
        if !self.available {
            return Err(PiPowerError::PowerMonitorUnavailable("not present".into()));
        }
        self.source.read()
    }
}
