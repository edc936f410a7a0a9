//! Hardware interaction modules
//!
//! Each peripheral class on the hat is reached through a small port trait.
//! The Linux sysfs implementations live in the submodules; the simulated
//! ones live in [`crate::mock`]. The facade only ever sees the traits, so
//! the backend is chosen once at startup and injected as a [`Peripherals`].

pub mod fan;
pub mod gpio;
pub mod light;
pub mod modules;
pub mod power;
pub mod pwm;
pub mod sysfs;
pub mod temperature;

use std::fmt;

use tracing::info;

use crate::config::{GpioMode, HardwarePaths};
use crate::data::PowerReading;
use crate::error::{PiPowerError, Result};

pub use fan::FanController;
pub use gpio::{GpioLineManager, SysfsGpio};
pub use light::{IioLightSensor, LightSensor};
pub use power::{HwmonPowerMonitor, PowerMonitor};
pub use pwm::SysfsPwm;
pub use temperature::W1TemperatureBus;

/// Temperature probes on the shared 1-Wire bus
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource: Send {
    /// Sensor ids for configuration choices; the first entry is always ""
    fn discover(&self) -> Vec<String>;

    /// Read one probe in degrees Celsius, rounded to one decimal
    fn read_celsius(&mut self, sensor_id: &str) -> Result<f64>;
}

/// Bus voltage / current monitor
#[cfg_attr(test, mockall::automock)]
pub trait PowerSource: Send {
    /// Check once that the device is present and answering
    fn probe(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<PowerReading>;
}

/// Optional ambient light sensor
#[cfg_attr(test, mockall::automock)]
pub trait LightSource: Send {
    fn probe(&mut self) -> Result<()>;

    fn read_lux(&mut self) -> Result<f64>;
}

/// Raw digital I/O lines (BCM numbering)
#[cfg_attr(test, mockall::automock)]
pub trait GpioPins: Send {
    /// Apply a mode; must be safe to call again with the same mode
    fn configure(&mut self, pin: u32, mode: GpioMode) -> Result<()>;

    fn read(&mut self, pin: u32) -> Result<bool>;

    fn write(&mut self, pin: u32, high: bool) -> Result<()>;
}

/// The two hardware PWM channels driving the fans
#[cfg_attr(test, mockall::automock)]
pub trait PwmOutput: Send {
    /// Export and enable a channel at the given frequency, 0% duty
    fn start(&mut self, channel: usize, frequency_hz: u32) -> Result<()>;

    fn set_duty(&mut self, channel: usize, percent: u8) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hardware,
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

/// One complete set of device ports, handed to the facade at construction
pub struct Peripherals {
    pub kind: BackendKind,
    pub temperature: Box<dyn TemperatureSource>,
    pub power: Box<dyn PowerSource>,
    pub light: Box<dyn LightSource>,
    pub gpio: Box<dyn GpioPins>,
    pub pwm: Box<dyn PwmOutput>,
}

impl Peripherals {
    /// Real sysfs-backed devices. Fails with `HardwareInitFailed` when the
    /// GPIO or PWM subsystem is missing; the optional sensors are probed
    /// later by the facade and never fail here.
    pub fn hardware(paths: &HardwarePaths) -> Result<Self> {
        if !paths.gpio.join("export").exists() {
            return Err(PiPowerError::HardwareInitFailed(format!(
                "GPIO subsystem not found at {}",
                paths.gpio.display()
            )));
        }
        if !paths.pwm_chip.join("export").exists() {
            return Err(PiPowerError::HardwareInitFailed(format!(
                "PWM chip not found at {}",
                paths.pwm_chip.display()
            )));
        }
        info!(
            gpio = %paths.gpio.display(),
            pwm = %paths.pwm_chip.display(),
            "Using sysfs hardware backend"
        );
        Ok(Self {
            kind: BackendKind::Hardware,
            temperature: Box::new(W1TemperatureBus::new(&paths.w1_devices)),
            power: Box::new(HwmonPowerMonitor::new(&paths.hwmon)),
            light: Box::new(IioLightSensor::new(&paths.iio_devices)),
            gpio: Box::new(SysfsGpio::new(&paths.gpio)),
            pwm: Box::new(SysfsPwm::new(&paths.pwm_chip)),
        })
    }
}
