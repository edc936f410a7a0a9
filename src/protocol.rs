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

//! Wire protocol for the query/command socket
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":7,"cmd":"SetFan","data":{"fan_id":0,"state":true,"speed":20}}
//! <- {"id":7,"status":"ok","data":{"snapshot":{...}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{board, fan};
use crate::data::Snapshot;
use crate::events::Event;
use crate::hat::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    GetSnapshot,
    ListTemperatureSensors,
    SetGpio { pin: u32, value: bool },
    SetFanState { fan_id: u32, state: bool },
    SetFanSpeed { fan_id: u32, speed: i64 },
    SetFan { fan_id: u32, state: bool, speed: i64 },
    ReloadConfig,
    /// Stream every published event on this connection
    Subscribe,
}

fn validate_fan_id(fan_id: u32) -> Result<(), String> {
    if fan_id as usize >= board::FAN_COUNT {
        return Err(format!("Fan id out of range (0-{})", board::FAN_COUNT - 1));
    }
    Ok(())
}

fn validate_speed(speed: i64) -> Result<(), String> {
    if !(0..=i64::from(fan::MAX_SPEED_PERCENT)).contains(&speed) {
        return Err(format!("Fan speed out of range (0-{})", fan::MAX_SPEED_PERCENT));
    }
    Ok(())
}

fn validate_pin(pin: u32) -> Result<(), String> {
    if !(board::GPIO_MIN_PIN..=board::GPIO_MAX_PIN).contains(&pin) {
        return Err(format!(
            "GPIO pin out of range ({}-{})",
            board::GPIO_MIN_PIN,
            board::GPIO_MAX_PIN
        ));
    }
    Ok(())
}

impl Request {
    /// Check parameters before anything reaches the hat
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::GetSnapshot
            | Request::ListTemperatureSensors
            | Request::ReloadConfig
            | Request::Subscribe => Ok(()),
            Request::SetGpio { pin, .. } => validate_pin(*pin),
            Request::SetFanState { fan_id, .. } => validate_fan_id(*fan_id),
            Request::SetFanSpeed { fan_id, speed } | Request::SetFan { fan_id, speed, .. } => {
                validate_fan_id(*fan_id)?;
                validate_speed(*speed)
            }
        }
    }

    /// The actuation this request maps to, if any
    pub fn command(&self) -> Option<Command> {
        match *self {
            Request::SetGpio { pin, value } => Some(Command::SetGpio { pin, value }),
            Request::SetFanState { fan_id, state } => {
                Some(Command::SetFanState { fan_id, enabled: state })
            }
            Request::SetFanSpeed { fan_id, speed } => Some(Command::SetFanSpeed { fan_id, speed }),
            Request::SetFan { fan_id, state, speed } => {
                Some(Command::SetFan { fan_id, enabled: state, speed })
            }
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::GetSnapshot => "GetSnapshot",
            Request::ListTemperatureSensors => "ListTemperatureSensors",
            Request::SetGpio { .. } => "SetGpio",
            Request::SetFanState { .. } => "SetFanState",
            Request::SetFanSpeed { .. } => "SetFanSpeed",
            Request::SetFan { .. } => "SetFan",
            Request::ReloadConfig => "ReloadConfig",
            Request::Subscribe => "Subscribe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

impl Response {
    pub fn ok(data: ResponseData) -> Self {
        Response::Ok(data)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error { message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl ResponseData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self { value: Some(v.into()), ..Self::default() }
    }

    pub fn snapshot(s: Snapshot) -> Self {
        Self { snapshot: Some(s), ..Self::default() }
    }

    pub fn sensors(ids: Vec<String>) -> Self {
        Self { sensors: Some(ids), ..Self::default() }
    }

    pub fn event(e: Event) -> Self {
        Self { event: Some(e), ..Self::default() }
    }
}
