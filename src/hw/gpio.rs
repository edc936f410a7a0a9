//! GPIO line management
//!
//! [`SysfsGpio`] drives pins through the legacy `/sys/class/gpio` interface.
//! Pull resistors are not reachable through that interface, so bias is set
//! with the Raspberry Pi `pinctrl` tool when it is installed.
//!
//! [`GpioLineManager`] owns the configured line table and the output
//! latches. Outputs are never read back from hardware: the value reported
//! for an Output line is the last value commanded through `set_line`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace, warn};

use crate::config::{GpioLineConfig, GpioMode};
use crate::data::GpioLineValue;
use crate::error::{PiPowerError, Result};
use crate::hw::sysfs;
use crate::hw::GpioPins;

pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn ensure_exported(&self, pin: u32) -> Result<PathBuf> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            sysfs::write_attr(&self.root.join("export"), &pin.to_string())?;
        }
        Ok(dir)
    }

    fn set_bias(pin: u32, mode: GpioMode) {
        let bias = match mode {
            GpioMode::InputPullDown => "pd",
            GpioMode::InputPullUp => "pu",
            GpioMode::Input => "pn",
            _ => return,
        };
        match Command::new("pinctrl").args(["set", &pin.to_string(), bias]).output() {
            Ok(out) if out.status.success() => trace!(pin, bias, "Set pull bias"),
            Ok(out) => debug!(
                "pinctrl could not set bias on GPIO {}: {}",
                pin,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => debug!("pinctrl unavailable, GPIO {} bias left unchanged: {}", pin, e),
        }
    }
}

impl GpioPins for SysfsGpio {
    fn configure(&mut self, pin: u32, mode: GpioMode) -> Result<()> {
        if mode == GpioMode::Disabled {
            return Ok(());
        }
        let dir = self.ensure_exported(pin)?;
        let direction_path = dir.join("direction");
        let wanted = if mode == GpioMode::Output { "out" } else { "in" };
        // Rewriting "out" would drop the line low, so leave a matching
        // direction alone
        let current = sysfs::read_trimmed(&direction_path).unwrap_or_default();
        if current != wanted {
            sysfs::write_attr(&direction_path, wanted)?;
        }
        Self::set_bias(pin, mode);
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool> {
        let raw = sysfs::read_trimmed(&self.pin_dir(pin).join("value"))?;
        Ok(raw == "1")
    }

    fn write(&mut self, pin: u32, high: bool) -> Result<()> {
        sysfs::write_attr(&self.pin_dir(pin).join("value"), if high { "1" } else { "0" })
    }
}

pub struct GpioLineManager {
    pins: Box<dyn GpioPins>,
    lines: Vec<GpioLineConfig>,
    latches: HashMap<u32, bool>,
}

impl GpioLineManager {
    pub fn new(pins: Box<dyn GpioPins>) -> Self {
        Self { pins, lines: Vec::new(), latches: HashMap::new() }
    }

    /// Apply the mode table. Safe to call again with the same table: modes
    /// are re-applied, existing output latches are kept. A line that fails
    /// to configure is logged and skipped.
    pub fn configure(&mut self, lines: &[GpioLineConfig]) {
        for line in lines {
            if let Err(e) = self.pins.configure(line.pin, line.mode) {
                warn!(pin = line.pin, mode = %line.mode, "GPIO configure failed: {}", e);
                continue;
            }
            if line.mode == GpioMode::Output && !self.latches.contains_key(&line.pin) {
                // Outputs start low so the latch matches the line
                if let Err(e) = self.pins.write(line.pin, false) {
                    warn!(pin = line.pin, "GPIO initial write failed: {}", e);
                }
                self.latches.insert(line.pin, false);
            }
            debug!(
                pin = line.pin,
                mode = %line.mode,
                caption = %line.caption,
                "Configured GPIO line"
            );
        }
        self.latches.retain(|pin, _| {
            lines.iter().any(|l| l.pin == *pin && l.mode == GpioMode::Output)
        });
        self.lines = lines.to_vec();
    }

    /// One value per line, in table order
    pub fn read_all(&mut self, lines: &[GpioLineConfig]) -> Vec<GpioLineValue> {
        lines
            .iter()
            .map(|line| {
                let value = match line.mode {
                    GpioMode::Disabled => None,
                    GpioMode::Output => Some(u8::from(self.latch(line.pin))),
                    _ => match self.pins.read(line.pin) {
                        Ok(high) => Some(u8::from(high)),
                        Err(e) => {
                            debug!(pin = line.pin, "GPIO sample failed: {}", e);
                            None
                        }
                    },
                };
                GpioLineValue { pin: line.pin, value }
            })
            .collect()
    }

    /// Drive an Output line. A hardware write failure is logged and the
    /// latch is still updated.
    pub fn set_line(&mut self, pin: u32, high: bool) -> Result<()> {
        let line = self
            .lines
            .iter()
            .find(|l| l.pin == pin)
            .ok_or(PiPowerError::UnknownGpioPin(pin))?;
        if line.mode != GpioMode::Output {
            return Err(PiPowerError::GpioNotOutput { pin, mode: line.mode.to_string() });
        }
        if let Err(e) = self.pins.write(pin, high) {
            let err = PiPowerError::actuation(format!("GPIO {}", pin), e.to_string());
            warn!("{}", err);
        }
        self.latches.insert(pin, high);
        Ok(())
    }

    /// Last commanded level of an Output line (low if never set)
    pub fn latch(&self, pin: u32) -> bool {
        self.latches.get(&pin).copied().unwrap_or(false)
    }
}
