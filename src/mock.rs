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

//! Simulated peripherals
//!
//! Readings are pseudo-random within plausible bounds for the board: probe
//! temperatures 20.0-120.0 °C, bus voltage 11-13 V, current 900-1200 mA,
//! light 0-255. GPIO inputs are random. Fan duty and GPIO outputs are kept
//! exactly as commanded, so actuation behaves as it would on the board.
//!
//! A fixed seed makes a run reproducible; individual probes can also be
//! pinned to a fixed value for deterministic checks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::GpioMode;
use crate::constants::{board, rounding};
use crate::data::{round_to, PowerReading};
use crate::error::{PiPowerError, Result};
use crate::hw::{
    BackendKind, GpioPins, LightSource, Peripherals, PowerSource, PwmOutput, TemperatureSource,
};

/// Every duty cycle written to the simulated PWM, in order
pub type DutyLog = Arc<Mutex<Vec<(usize, u8)>>>;

/// Builder for a simulated board
pub struct SimulatedBoard {
    seed: u64,
    sensor_ids: Vec<String>,
    fixed_temperatures: HashMap<String, f64>,
    power_present: bool,
    light_present: bool,
    duty_log: DutyLog,
}

impl SimulatedBoard {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            sensor_ids: vec!["28-000007538f5b".to_string(), "28-0000070e4078".to_string()],
            fixed_temperatures: HashMap::new(),
            power_present: true,
            light_present: true,
            duty_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seed from the thread-local RNG
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// Replace the probe ids reported by discovery
    pub fn with_sensor_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensor_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Pin one probe to a fixed reading
    pub fn with_fixed_temperature(mut self, sensor_id: impl Into<String>, celsius: f64) -> Self {
        self.fixed_temperatures.insert(sensor_id.into(), celsius);
        self
    }

    pub fn without_power_monitor(mut self) -> Self {
        self.power_present = false;
        self
    }

    pub fn without_light_sensor(mut self) -> Self {
        self.light_present = false;
        self
    }

    /// Shared view of every duty cycle the fans are driven to
    pub fn duty_log(&self) -> DutyLog {
        Arc::clone(&self.duty_log)
    }

    pub fn build(self) -> Peripherals {
        info!(seed = self.seed, "Using simulated hardware backend");
        let rng = |offset: u64| StdRng::seed_from_u64(self.seed.wrapping_add(offset));
        Peripherals {
            kind: BackendKind::Simulated,
            temperature: Box::new(SimulatedTemperatures {
                rng: rng(0),
                sensor_ids: self.sensor_ids.clone(),
                fixed: self.fixed_temperatures.clone(),
            }),
            power: Box::new(SimulatedPower { rng: rng(1), present: self.power_present }),
            light: Box::new(SimulatedLight { rng: rng(2), present: self.light_present }),
            gpio: Box::new(SimulatedGpio {
                rng: rng(3),
                modes: HashMap::new(),
                outputs: HashMap::new(),
            }),
            pwm: Box::new(SimulatedPwm { started: [false; board::FAN_COUNT], log: self.duty_log }),
        }
    }
}

struct SimulatedTemperatures {
    rng: StdRng,
    sensor_ids: Vec<String>,
    fixed: HashMap<String, f64>,
}

impl TemperatureSource for SimulatedTemperatures {
    fn discover(&self) -> Vec<String> {
        let mut ids = vec![String::new()];
        ids.extend(self.sensor_ids.iter().cloned());
        ids
    }

    fn read_celsius(&mut self, sensor_id: &str) -> Result<f64> {
        if let Some(v) = self.fixed.get(sensor_id) {
            return Ok(round_to(*v, rounding::TEMPERATURE_DECIMALS));
        }
        let tenths: u32 = self.rng.gen_range(0..=1000);
        Ok(round_to(f64::from(tenths) * 0.1 + 20.0, rounding::TEMPERATURE_DECIMALS))
    }
}

struct SimulatedPower {
    rng: StdRng,
    present: bool,
}

impl PowerSource for SimulatedPower {
    fn probe(&mut self) -> Result<()> {
        if self.present {
            Ok(())
        } else {
            Err(PiPowerError::PowerMonitorUnavailable(
                "simulated board has no power monitor".into(),
            ))
        }
    }

    fn read(&mut self) -> Result<PowerReading> {
        let centivolts: u32 = self.rng.gen_range(1100..=1300);
        let deci_milliamps: u32 = self.rng.gen_range(9000..=12000);
        Ok(PowerReading::new(
            f64::from(centivolts) / 100.0,
            f64::from(deci_milliamps) / 10.0,
        ))
    }
}

struct SimulatedLight {
    rng: StdRng,
    present: bool,
}

impl LightSource for SimulatedLight {
    fn probe(&mut self) -> Result<()> {
        if self.present {
            Ok(())
        } else {
            Err(PiPowerError::LightSensorUnavailable("simulated board has no light sensor".into()))
        }
    }

    fn read_lux(&mut self) -> Result<f64> {
        Ok(f64::from(self.rng.gen_range(0u32..=255)))
    }
}

struct SimulatedGpio {
    rng: StdRng,
    modes: HashMap<u32, GpioMode>,
    outputs: HashMap<u32, bool>,
}

impl GpioPins for SimulatedGpio {
    fn configure(&mut self, pin: u32, mode: GpioMode) -> Result<()> {
        debug!(pin, mode = %mode, "Simulated GPIO configure");
        self.modes.insert(pin, mode);
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool> {
        match self.modes.get(&pin) {
            Some(GpioMode::Output) => Ok(self.outputs.get(&pin).copied().unwrap_or(false)),
            Some(mode) if mode.is_input() => Ok(self.rng.gen_bool(0.5)),
            _ => Err(PiPowerError::UnknownGpioPin(pin)),
        }
    }

    fn write(&mut self, pin: u32, high: bool) -> Result<()> {
        self.outputs.insert(pin, high);
        Ok(())
    }
}

struct SimulatedPwm {
    started: [bool; board::FAN_COUNT],
    log: DutyLog,
}

impl PwmOutput for SimulatedPwm {
    fn start(&mut self, channel: usize, frequency_hz: u32) -> Result<()> {
        let slot = self
            .started
            .get_mut(channel)
            .ok_or_else(|| {
                PiPowerError::actuation(format!("PWM channel {}", channel), "no such channel")
            })?;
        *slot = true;
        debug!(channel, frequency_hz, "Simulated PWM start");
        Ok(())
    }

    fn set_duty(&mut self, channel: usize, percent: u8) -> Result<()> {
        if !self.started.get(channel).copied().unwrap_or(false) {
            return Err(PiPowerError::actuation(
                format!("PWM channel {}", channel),
                "channel not started",
            ));
        }
        self.log.lock().push((channel, percent));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_stay_in_bounds() {
        let mut p = SimulatedBoard::new(7).build();
        for _ in 0..200 {
            let t = p.temperature.read_celsius("28-000007538f5b").unwrap();
            assert!((20.0..=120.0).contains(&t));
            let pw = p.power.read().unwrap();
            assert!((11.0..=13.0).contains(&pw.voltage_volts));
            assert!((900.0..=1200.0).contains(&pw.current_milliamps));
            let lux = p.light.read_lux().unwrap();
            assert!((0.0..=255.0).contains(&lux));
        }
    }

    #[test]
    fn same_seed_same_readings() {
        let mut a = SimulatedBoard::new(42).build();
        let mut b = SimulatedBoard::new(42).build();
        for _ in 0..10 {
            assert_eq!(
                a.temperature.read_celsius("28-x").unwrap(),
                b.temperature.read_celsius("28-x").unwrap()
            );
        }
    }

    #[test]
    fn fixed_temperature_overrides_random() {
        let mut p = SimulatedBoard::new(1).with_fixed_temperature("28-AA", 42.3).build();
        assert_eq!(p.temperature.read_celsius("28-AA").unwrap(), 42.3);
    }

    #[test]
    fn absent_optional_sensors_fail_probe() {
        let mut p = SimulatedBoard::new(1).without_light_sensor().without_power_monitor().build();
        assert!(p.light.probe().is_err());
        assert!(p.power.probe().is_err());
    }

    #[test]
    fn outputs_echo_commanded_state() {
        let mut p = SimulatedBoard::new(3).build();
        p.gpio.configure(16, GpioMode::Output).unwrap();
        p.gpio.write(16, true).unwrap();
        assert!(p.gpio.read(16).unwrap());
        assert!(p.gpio.read(5).is_err());
    }

    #[test]
    fn pwm_records_duty_after_start() {
        let board = SimulatedBoard::new(3);
        let log = board.duty_log();
        let mut p = board.build();
        assert!(p.pwm.set_duty(0, 10).is_err());
        p.pwm.start(0, 100).unwrap();
        p.pwm.set_duty(0, 10).unwrap();
        assert_eq!(*log.lock(), vec![(0, 10)]);
    }

    #[test]
    fn discovery_lists_placeholder_first() {
        let p = SimulatedBoard::new(0).with_sensor_ids(["28-AA"]).build();
        assert_eq!(p.temperature.discover(), vec!["", "28-AA"]);
    }
}
