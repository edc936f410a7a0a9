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

//! Unified error handling for PiPower
//!
//! A single error type is shared by the device readers, the facade and the
//! daemon. Sensor-level variants are recovered locally by the facade and end
//! up as absent values in the snapshot; only sequencing and validation errors
//! reach callers.

use std::io;
use std::path::PathBuf;

use crate::hat::HatState;

/// Result type alias using PiPowerError
pub type Result<T> = std::result::Result<T, PiPowerError>;

#[derive(thiserror::Error, Debug)]
pub enum PiPowerError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sensor Errors (recovered into absent readings)
    // ============================================================================
    #[error("Temperature sensor {sensor_id} unavailable: {reason}")]
    SensorUnavailable {
        sensor_id: String,
        reason: String,
    },

    #[error("Temperature sensor {sensor_id} not ready after {attempts} attempts")]
    SensorNotReady {
        sensor_id: String,
        attempts: u32,
    },

    #[error("Power monitor unavailable: {0}")]
    PowerMonitorUnavailable(String),

    #[error("Light sensor unavailable: {0}")]
    LightSensorUnavailable(String),

    // ============================================================================
    // Hardware Setup and Actuation Errors
    // ============================================================================
    #[error("Hardware initialization failed: {0}")]
    HardwareInitFailed(String),

    #[error("Failed to drive {target}: {reason}")]
    ActuationFailed {
        target: String,
        reason: String,
    },

    #[error("Power hat not initialized (state: {0:?})")]
    NotInitialized(HatState),

    // ============================================================================
    // Command Validation Errors
    // ============================================================================
    #[error("Invalid fan id: {0} (must be 0 or 1)")]
    InvalidFan(u32),

    #[error("Invalid fan speed: {0} (must be 0-100)")]
    InvalidFanSpeed(i64),

    #[error("GPIO pin {0} is not configured")]
    UnknownGpioPin(u32),

    #[error("GPIO pin {pin} is configured as {mode}, not output")]
    GpioNotOutput {
        pin: u32,
        mode: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

impl PiPowerError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn sensor_unavailable(sensor_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            sensor_id: sensor_id.into(),
            reason: reason.into(),
        }
    }

    pub fn actuation(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActuationFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// True for the per-sensor failures the facade turns into absent readings
    pub fn is_sensor_unavailable(&self) -> bool {
        matches!(
            self,
            Self::SensorUnavailable { .. } | Self::SensorNotReady { .. }
        )
    }

    /// True for errors caused by a bad command rather than by the hardware
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFan(_)
                | Self::InvalidFanSpeed(_)
                | Self::UnknownGpioPin(_)
                | Self::GpioNotOutput { .. }
        )
    }
}
