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

//! PiPower - telemetry and actuation core for the PiPower Raspberry Pi hat
//!
//! This library samples the hat's temperature probes, power monitor, light
//! sensor and GPIO lines, drives its two PWM fans, and serves the latest
//! snapshot to the `pipowerd` daemon's socket clients and event sinks.

pub mod config;
pub mod constants;
pub mod data;
pub mod error;
pub mod events;
pub mod hat;
pub mod hw;
pub mod mock;
pub mod poller;
pub mod protocol;
pub mod server;

pub use config::{GpioLineConfig, GpioMode, Settings, TemperatureSensorConfig};
pub use data::{FanView, GpioLineValue, PowerReading, SensorReading, Snapshot};
pub use error::{PiPowerError, Result};
pub use hat::{Command, HatState, PowerHat};
pub use hw::{BackendKind, Peripherals};
pub use mock::SimulatedBoard;
pub use poller::HatService;
