/*
 * This file is part of PiPower.
 *
 * Copyright (C) 2025 PiPower contributors
 *
 * PiPower is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * PiPower is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with PiPower. If not, see <https://www.gnu.org/licenses/>.
 */

//! Power Hat facade
//!
//! [`PowerHat`] composes the device readers and the two actuators behind
//! one lock. All callers (both timers and the command path) go through it,
//! so fan state and GPIO latches are only ever seen fully updated.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> Reading | Actuating
//!                        \-> Failed
//! ```
//!
//! `read_all` and `apply_command` are only accepted in `Ready`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{GpioLineConfig, Settings};
use crate::data::{now_ms, SensorReading, Snapshot};
use crate::error::{PiPowerError, Result};
use crate::hw::{
    BackendKind, FanController, GpioLineManager, LightSensor, Peripherals, PowerMonitor,
    TemperatureSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HatState {
    Uninitialized,
    Initializing,
    Ready,
    Reading,
    Actuating,
    Failed,
}

impl fmt::Display for HatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Actuation requests accepted by [`PowerHat::apply_command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetGpio { pin: u32, value: bool },
    SetFan { fan_id: u32, enabled: bool, speed: i64 },
    SetFanState { fan_id: u32, enabled: bool },
    SetFanSpeed { fan_id: u32, speed: i64 },
}

struct Devices {
    temperature: Box<dyn TemperatureSource>,
    power: PowerMonitor,
    light: LightSensor,
    gpio: GpioLineManager,
    fans: FanController,
    /// Probes whose last read failed, so the failure is logged once
    failing_sensors: HashSet<String>,
}

/// Restores `Ready` when a read or actuation finishes, including on unwind
struct Transition<'a> {
    state: &'a Mutex<HatState>,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a Mutex<HatState>, during: HatState) -> Result<Self> {
        let mut current = state.lock();
        if *current != HatState::Ready {
            return Err(PiPowerError::NotInitialized(*current));
        }
        *current = during;
        Ok(Self { state })
    }

    fn set(&self, next: HatState) {
        *self.state.lock() = next;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        *self.state.lock() = HatState::Ready;
    }
}

pub struct PowerHat {
    kind: BackendKind,
    state: Mutex<HatState>,
    devices: Mutex<Devices>,
}

impl PowerHat {
    pub fn new(peripherals: Peripherals) -> Self {
        let Peripherals { kind, temperature, power, light, gpio, pwm } = peripherals;
        Self {
            kind,
            state: Mutex::new(HatState::Uninitialized),
            devices: Mutex::new(Devices {
                temperature,
                power: PowerMonitor::new(power),
                light: LightSensor::new(light),
                gpio: GpioLineManager::new(gpio),
                fans: FanController::new(pwm),
                failing_sensors: HashSet::new(),
            }),
        }
    }

    /// Override the fan kick settle time
    pub fn with_kick_delay(self, delay: Duration) -> Self {
        self.devices.lock().fans.set_kick_delay(delay);
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.kind
    }

    pub fn state(&self) -> HatState {
        *self.state.lock()
    }

    /// Configure GPIO lines, start both fan channels at 0% and probe the
    /// optional sensors. Only a PWM failure is fatal.
    pub fn initialize(&self, settings: &Settings) -> Result<()> {
        let mut devices = self.devices.lock();
        *self.state.lock() = HatState::Initializing;
        info!(backend = %self.kind, "Initializing power hat");

        devices.gpio.configure(&settings.gpio_options);
        if let Err(e) = devices.fans.start(settings.pwm_frequency) {
            error!("Power hat initialization failed: {}", e);
            *self.state.lock() = HatState::Failed;
            return Err(e);
        }
        let power = devices.power.initialize();
        let light = devices.light.initialize();
        devices.failing_sensors.clear();

        *self.state.lock() = HatState::Ready;
        info!(
            gpio_lines = settings.gpio_options.len(),
            power_monitor = power,
            light_sensor = light,
            "Power hat ready"
        );
        Ok(())
    }

    /// Build a fresh snapshot. Per-sensor failures become absent values.
    pub fn read_all(&self, settings: &Settings) -> Result<Snapshot> {
        let mut devices = self.devices.lock();
        let _transition = Transition::begin(&self.state, HatState::Reading)?;
        Ok(devices.snapshot(settings))
    }

    /// Apply one command, then read everything back
    pub fn apply_command(&self, command: &Command, settings: &Settings) -> Result<Snapshot> {
        let mut devices = self.devices.lock();
        let transition = Transition::begin(&self.state, HatState::Actuating)?;
        devices.dispatch(command)?;
        transition.set(HatState::Reading);
        Ok(devices.snapshot(settings))
    }

    /// Probe ids on the bus, placeholder first
    pub fn discover_sensors(&self) -> Vec<String> {
        self.devices.lock().temperature.discover()
    }

    /// Re-apply a (possibly changed) GPIO table after a settings reload
    pub fn reconfigure_gpio(&self, lines: &[GpioLineConfig]) -> Result<()> {
        let mut devices = self.devices.lock();
        let _transition = Transition::begin(&self.state, HatState::Actuating)?;
        devices.gpio.configure(lines);
        Ok(())
    }

    /// Drive both fans to 0% and refuse further work
    pub fn shutdown(&self) {
        let mut devices = self.devices.lock();
        devices.fans.stop_all();
        *self.state.lock() = HatState::Uninitialized;
        info!("Power hat shut down, fans stopped");
    }
}

impl Devices {
    fn dispatch(&mut self, command: &Command) -> Result<()> {
        debug!(?command, "Applying command");
        match *command {
            Command::SetGpio { pin, value } => self.gpio.set_line(pin, value),
            Command::SetFan { fan_id, enabled, speed } => {
                self.fans.set_fan(fan_id, enabled, speed).map(|_| ())
            }
            Command::SetFanState { fan_id, enabled } => {
                self.fans.set_fan_state(fan_id, enabled).map(|_| ())
            }
            Command::SetFanSpeed { fan_id, speed } => {
                self.fans.set_fan_speed(fan_id, speed).map(|_| ())
            }
        }
    }

    fn read_temperature(&mut self, sensor_id: &str) -> Option<f64> {
        match self.temperature.read_celsius(sensor_id) {
            Ok(v) => {
                if self.failing_sensors.remove(sensor_id) {
                    info!(sensor = %sensor_id, "Temperature sensor recovered");
                }
                Some(v)
            }
            Err(e) if e.is_sensor_unavailable() => {
                if self.failing_sensors.insert(sensor_id.to_string()) {
                    warn!(sensor = %sensor_id, "Temperature read failed: {}", e);
                } else {
                    debug!(sensor = %sensor_id, "Temperature read failed: {}", e);
                }
                None
            }
            Err(e) => {
                error!(sensor = %sensor_id, "Temperature read error: {}", e);
                None
            }
        }
    }

    fn snapshot(&mut self, settings: &Settings) -> Snapshot {
        let temperatures = settings
            .temperature_sensors
            .iter()
            .map(|slot| {
                let id = slot.sensor_id.trim();
                let value = if slot.is_configured() { self.read_temperature(id) } else { None };
                SensorReading { sensor_id: id.to_string(), caption: slot.caption.clone(), value }
            })
            .collect();

        let power = match self.power.read() {
            Ok(p) => Some(p),
            Err(e) => {
                if self.power.is_available() {
                    debug!("Power read failed: {}", e);
                }
                None
            }
        };

        Snapshot {
            temperatures,
            power,
            light_level: self.light.read_level(),
            fans: self.fans.views(|id| settings.fan_caption(id)),
            gpio_values: self.gpio.read_all(&settings.gpio_options),
            timestamp_ms: now_ms(),
        }
    }
}
