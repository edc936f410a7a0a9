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

//! Reading and snapshot types
//!
//! Everything here is plain data: built once per poll and never mutated
//! afterwards. Field names serialize in camelCase, which is the shape the
//! query responder and the event publisher both emit.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::{board, rounding};

/// Round half away from zero to a fixed number of decimals
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// One configured temperature slot's reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_id: String,
    pub caption: String,
    /// Celsius, one decimal; `None` when the slot is empty or the read failed
    pub value: Option<f64>,
}

impl SensorReading {
    pub fn absent(sensor_id: impl Into<String>, caption: impl Into<String>) -> Self {
        Self { sensor_id: sensor_id.into(), caption: caption.into(), value: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerReading {
    pub voltage_volts: f64,
    pub current_milliamps: f64,
    pub power_watts: f64,
}

impl PowerReading {
    /// Round the raw measurements and derive power from the rounded values,
    /// so `power_watts == round(voltage_volts * current_milliamps / 1000)`
    /// holds for every reading that leaves this crate.
    pub fn new(voltage_volts: f64, current_milliamps: f64) -> Self {
        let voltage_volts = round_to(voltage_volts, rounding::VOLTAGE_DECIMALS);
        let current_milliamps = round_to(current_milliamps, rounding::CURRENT_DECIMALS);
        let power_watts = round_to(
            voltage_volts * current_milliamps / 1000.0,
            rounding::POWER_DECIMALS,
        );
        Self { voltage_volts, current_milliamps, power_watts }
    }
}

/// Commanded state of one PWM fan channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanState {
    pub enabled: bool,
    pub commanded_speed_percent: u8,
}

impl FanState {
    pub fn effective_speed_percent(&self) -> u8 {
        if self.enabled { self.commanded_speed_percent } else { 0 }
    }
}

/// Public per-fan view: `speed` is effective, `set_speed` is commanded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanView {
    pub fan_id: u32,
    pub caption: String,
    pub state: bool,
    pub speed: u8,
    pub set_speed: u8,
}

impl FanView {
    pub fn from_state(fan_id: u32, caption: impl Into<String>, state: &FanState) -> Self {
        Self {
            fan_id,
            caption: caption.into(),
            state: state.enabled,
            speed: state.effective_speed_percent(),
            set_speed: state.commanded_speed_percent,
        }
    }

    /// The non-actuatable third fan, always on at full speed
    pub fn always_on(caption: impl Into<String>) -> Self {
        Self {
            fan_id: board::ALWAYS_ON_FAN_ID,
            caption: caption.into(),
            state: true,
            speed: 100,
            set_speed: 100,
        }
    }
}

/// One GPIO line's reported value; `value` is `None` for Disabled lines,
/// otherwise 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpioLineValue {
    pub pin: u32,
    pub value: Option<u8>,
}

/// One complete aggregate reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub temperatures: Vec<SensorReading>,
    /// `None` when the power monitor is unavailable
    pub power: Option<PowerReading>,
    /// Lux, or -1 when no light sensor is present
    pub light_level: f64,
    pub fans: Vec<FanView>,
    pub gpio_values: Vec<GpioLineValue>,
    pub timestamp_ms: u64,
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
