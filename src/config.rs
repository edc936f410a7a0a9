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

//! Settings document
//!
//! The settings are a single JSON file with camelCase keys. They supply the
//! temperature sensor slots, the GPIO line table, the PWM frequency and the
//! two poll intervals. The scheduler re-reads them on every poll; GPIO modes
//! are applied at initialize and on reload, the PWM frequency only at
//! initialize.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{board, limits, paths, pwm, timing};
use crate::error::{PiPowerError, Result};

/// One temperature slot; an empty `sensor_id` means "no sensor selected"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TemperatureSensorConfig {
    #[serde(default)]
    pub sensor_id: String,
    #[serde(default)]
    pub caption: String,
}

impl TemperatureSensorConfig {
    pub fn new(sensor_id: impl Into<String>, caption: impl Into<String>) -> Self {
        Self { sensor_id: sensor_id.into(), caption: caption.into() }
    }

    pub fn is_configured(&self) -> bool {
        !self.sensor_id.trim().is_empty()
    }
}

/// GPIO line mode. Encoded on the wire as Disabled=0, Input=1,
/// InputPullDown=2, InputPullUp=3, Output=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GpioMode {
    Disabled,
    Input,
    InputPullDown,
    InputPullUp,
    Output,
}

impl GpioMode {
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputPullDown | Self::InputPullUp)
    }
}

impl TryFrom<u8> for GpioMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Input),
            2 => Ok(Self::InputPullDown),
            3 => Ok(Self::InputPullUp),
            4 => Ok(Self::Output),
            other => Err(format!("unknown gpio mode {} (expected 0-4)", other)),
        }
    }
}

impl From<GpioMode> for u8 {
    fn from(mode: GpioMode) -> u8 {
        match mode {
            GpioMode::Disabled => 0,
            GpioMode::Input => 1,
            GpioMode::InputPullDown => 2,
            GpioMode::InputPullUp => 3,
            GpioMode::Output => 4,
        }
    }
}

impl fmt::Display for GpioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "disabled",
            Self::Input => "input",
            Self::InputPullDown => "input-pulldown",
            Self::InputPullUp => "input-pullup",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

/// One configurable GPIO line (BCM numbering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GpioLineConfig {
    pub pin: u32,
    #[serde(default)]
    pub caption: String,
    pub mode: GpioMode,
}

impl GpioLineConfig {
    pub fn new(pin: u32, caption: impl Into<String>, mode: GpioMode) -> Self {
        Self { pin, caption: caption.into(), mode }
    }
}

/// sysfs roots used by the real backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct HardwarePaths {
    pub w1_devices: PathBuf,
    pub hwmon: PathBuf,
    pub iio_devices: PathBuf,
    pub gpio: PathBuf,
    pub pwm_chip: PathBuf,
}

impl Default for HardwarePaths {
    fn default() -> Self {
        Self {
            w1_devices: PathBuf::from(paths::W1_DEVICES),
            hwmon: PathBuf::from(paths::HWMON_BASE),
            iio_devices: PathBuf::from(paths::IIO_DEVICES),
            gpio: PathBuf::from(paths::GPIO_BASE),
            pwm_chip: PathBuf::from(paths::PWM_CHIP),
        }
    }
}

impl HardwarePaths {
    /// All roots below one directory, mirroring the real sysfs layout
    pub fn under(root: &Path) -> Self {
        Self {
            w1_devices: root.join("bus/w1/devices"),
            hwmon: root.join("class/hwmon"),
            iio_devices: root.join("bus/iio/devices"),
            gpio: root.join("class/gpio"),
            pwm_chip: root.join("class/pwm/pwmchip0"),
        }
    }
}

fn default_pwm_frequency() -> u32 {
    pwm::DEFAULT_FREQUENCY_HZ
}

fn default_timer_interval() -> f64 {
    timing::DEFAULT_TIMER_INTERVAL_SECS
}

fn default_event_timer_interval() -> f64 {
    timing::DEFAULT_EVENT_TIMER_INTERVAL_SECS
}

fn default_fan_captions() -> Vec<String> {
    vec!["Cooling Fan".to_string(), "Pi Fan".to_string()]
}

fn default_temperature_sensors() -> Vec<TemperatureSensorConfig> {
    vec![
        TemperatureSensorConfig::new("28-000007538f5b", "PSU PCB"),
        TemperatureSensorConfig::new("28-0000070e4078", "Internal Air"),
        TemperatureSensorConfig::new("", "External Air"),
        TemperatureSensorConfig::new("", "Extra"),
    ]
}

fn default_gpio_options() -> Vec<GpioLineConfig> {
    vec![
        GpioLineConfig::new(16, "GPIO Pin 16", GpioMode::Disabled),
        GpioLineConfig::new(26, "GPIO Pin 26", GpioMode::Disabled),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_temperature_sensors")]
    pub temperature_sensors: Vec<TemperatureSensorConfig>,
    #[serde(default = "default_gpio_options")]
    pub gpio_options: Vec<GpioLineConfig>,
    /// Startup-only
    #[serde(default = "default_pwm_frequency")]
    pub pwm_frequency: u32,
    /// Fast timer (cache refresh), seconds
    #[serde(default = "default_timer_interval")]
    pub timer_interval: f64,
    /// Slow timer (event publish), seconds
    #[serde(default = "default_event_timer_interval")]
    pub event_timer_interval: f64,
    /// Display names for fan 0, fan 1 and the always-on fan
    #[serde(default = "default_fan_captions")]
    pub fan_captions: Vec<String>,
    #[serde(default)]
    pub hardware: HardwarePaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature_sensors: default_temperature_sensors(),
            gpio_options: default_gpio_options(),
            pwm_frequency: default_pwm_frequency(),
            timer_interval: default_timer_interval(),
            event_timer_interval: default_event_timer_interval(),
            fan_captions: default_fan_captions(),
            hardware: HardwarePaths::default(),
        }
    }
}

/// Seconds to a `Duration`, clamped to the accepted interval range. The
/// fields are public, so an unvalidated value must not panic the timers.
fn interval_from_secs(secs: f64) -> Duration {
    let clamped = if secs.is_nan() {
        timing::MIN_INTERVAL_SECS
    } else {
        secs.clamp(timing::MIN_INTERVAL_SECS, timing::MAX_INTERVAL_SECS)
    };
    Duration::from_secs_f64(clamped)
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        interval_from_secs(self.timer_interval)
    }

    pub fn event_interval(&self) -> Duration {
        interval_from_secs(self.event_timer_interval)
    }

    /// Caption for a snapshot fan entry, falling back to "Fan <id>"
    pub fn fan_caption(&self, fan_id: u32) -> String {
        self.fan_captions
            .get(fan_id as usize)
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Fan {}", fan_id))
    }
}

/// Resolve the settings file: explicit path, then `PIPOWER_CONFIG`, then the
/// user config directory if a file exists there, then the system file.
pub fn settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = env::var(crate::constants::env::CONFIG) {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join(paths::CONFIG_DIR_NAME).join(paths::SETTINGS_FILE);
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(paths::SYSTEM_SETTINGS)
}

/// Load and validate settings; a missing file yields the defaults
pub fn load_settings(path: &Path) -> Result<Settings> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No settings at {:?}, using defaults", path);
            return Ok(Settings::default());
        }
        Err(e) => return Err(PiPowerError::FileRead { path: path.to_path_buf(), source: e }),
    };
    let settings = parse_settings(&data)?;
    debug!(
        path = %path.display(),
        sensors = settings.temperature_sensors.len(),
        gpio_lines = settings.gpio_options.len(),
        "Loaded settings"
    );
    Ok(settings)
}

/// Parse and validate a settings document
pub fn parse_settings(data: &str) -> Result<Settings> {
    let settings: Settings = serde_json::from_str(data)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn is_valid_sensor_id(id: &str) -> bool {
    // <2 hex family>-<hex serial>, e.g. 28-000007538f5b
    match id.split_once('-') {
        Some((family, serial)) => {
            id.len() <= limits::MAX_SENSOR_ID_LEN
                && family.len() == 2
                && family.chars().all(|c| c.is_ascii_hexdigit())
                && !serial.is_empty()
                && serial.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

fn validate_interval(field: &str, secs: f64) -> Result<()> {
    if !(timing::MIN_INTERVAL_SECS..=timing::MAX_INTERVAL_SECS).contains(&secs) {
        return Err(PiPowerError::invalid_config(
            field,
            format!(
                "must be between {} and {} seconds",
                timing::MIN_INTERVAL_SECS,
                timing::MAX_INTERVAL_SECS
            ),
        ));
    }
    Ok(())
}

fn validate_caption(field: &str, caption: &str) -> Result<()> {
    if caption.chars().count() > limits::MAX_CAPTION_LEN {
        return Err(PiPowerError::invalid_config(
            field,
            format!("caption longer than {} characters", limits::MAX_CAPTION_LEN),
        ));
    }
    Ok(())
}

pub fn validate_settings(s: &Settings) -> Result<()> {
    if s.temperature_sensors.len() > board::MAX_TEMPERATURE_SENSORS {
        return Err(PiPowerError::invalid_config(
            "temperatureSensors",
            format!("at most {} sensors", board::MAX_TEMPERATURE_SENSORS),
        ));
    }
    for (i, t) in s.temperature_sensors.iter().enumerate() {
        if t.is_configured() && !is_valid_sensor_id(t.sensor_id.trim()) {
            return Err(PiPowerError::invalid_config(
                "temperatureSensors",
                format!("slot #{} has malformed sensor id '{}'", i + 1, t.sensor_id),
            ));
        }
        validate_caption("temperatureSensors", &t.caption)?;
    }

    let mut seen = Vec::with_capacity(s.gpio_options.len());
    for line in &s.gpio_options {
        if line.pin < board::GPIO_MIN_PIN || line.pin > board::GPIO_MAX_PIN {
            return Err(PiPowerError::invalid_config(
                "gpioOptions",
                format!(
                    "pin {} outside BCM {}..={}",
                    line.pin,
                    board::GPIO_MIN_PIN,
                    board::GPIO_MAX_PIN
                ),
            ));
        }
        if board::FAN_PINS.contains(&line.pin) {
            return Err(PiPowerError::invalid_config(
                "gpioOptions",
                format!("pin {} is reserved for fan PWM", line.pin),
            ));
        }
        if seen.contains(&line.pin) {
            return Err(PiPowerError::invalid_config(
                "gpioOptions",
                format!("pin {} configured twice", line.pin),
            ));
        }
        seen.push(line.pin);
        validate_caption("gpioOptions", &line.caption)?;
    }

    if !(pwm::MIN_FREQUENCY_HZ..=pwm::MAX_FREQUENCY_HZ).contains(&s.pwm_frequency) {
        return Err(PiPowerError::invalid_config(
            "pwmFrequency",
            format!("must be {}..={} Hz", pwm::MIN_FREQUENCY_HZ, pwm::MAX_FREQUENCY_HZ),
        ));
    }
    validate_interval("timerInterval", s.timer_interval)?;
    validate_interval("eventTimerInterval", s.event_timer_interval)?;
    if s.fan_captions.len() > board::FAN_VIEW_COUNT {
        return Err(PiPowerError::invalid_config(
            "fanCaptions",
            format!("at most {} captions", board::FAN_VIEW_COUNT),
        ));
    }
    for caption in &s.fan_captions {
        validate_caption("fanCaptions", caption)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(validate_settings(&s).is_ok());
        assert_eq!(s.temperature_sensors.len(), 4);
        assert!(!s.temperature_sensors[2].is_configured());
        assert_eq!(s.gpio_options[0].mode, GpioMode::Disabled);
    }

    #[test]
    fn parses_camel_case_document() {
        let json = r#"{
            "temperatureSensors": [{"sensorId": "28-AA", "caption": "PSU"}],
            "gpioOptions": [
                {"pin": 16, "caption": "Relay", "mode": 4},
                {"pin": 26, "caption": "Door", "mode": 3}
            ],
            "pwmFrequency": 25,
            "timerInterval": 2.5,
            "eventTimerInterval": 30
        }"#;
        let s = parse_settings(json).unwrap();
        assert_eq!(s.temperature_sensors[0].sensor_id, "28-AA");
        assert_eq!(s.gpio_options[0].mode, GpioMode::Output);
        assert_eq!(s.gpio_options[1].mode, GpioMode::InputPullUp);
        assert_eq!(s.pwm_frequency, 25);
        assert_eq!(s.poll_interval(), Duration::from_millis(2500));
        // Omitted keys fall back to defaults
        assert_eq!(s.fan_captions.len(), 2);
        assert_eq!(s.hardware, HardwarePaths::default());
    }

    #[test]
    fn gpio_mode_round_trips_as_integer() {
        let line = GpioLineConfig::new(5, "x", GpioMode::InputPullDown);
        let v = serde_json::to_value(&line).unwrap();
        assert_eq!(v["mode"], 2);
        assert!(serde_json::from_str::<GpioLineConfig>(r#"{"pin":5,"mode":9}"#).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_settings(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let mut s = Settings::default();
        s.gpio_options.push(GpioLineConfig::new(16, "dup", GpioMode::Input));
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.gpio_options = vec![GpioLineConfig::new(18, "fan pin", GpioMode::Output)];
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.gpio_options = vec![GpioLineConfig::new(40, "off header", GpioMode::Input)];
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.timer_interval = 0.0;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.event_timer_interval = f64::NAN;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.pwm_frequency = 0;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.temperature_sensors[0].sensor_id = "../../etc".into();
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn rejects_intervals_beyond_one_day() {
        let err = parse_settings(r#"{"timerInterval": 1e20}"#).unwrap_err();
        assert!(matches!(
            err,
            PiPowerError::InvalidConfig { ref field, .. } if field == "timerInterval"
        ));
        assert!(parse_settings(r#"{"eventTimerInterval": 86401}"#).is_err());
        assert!(parse_settings(r#"{"eventTimerInterval": 86400}"#).is_ok());
    }

    #[test]
    fn unvalidated_intervals_are_clamped() {
        let s = Settings {
            timer_interval: 1e20,
            event_timer_interval: f64::NAN,
            ..Settings::default()
        };
        assert_eq!(s.poll_interval(), Duration::from_secs(86_400));
        assert_eq!(s.event_interval(), Duration::from_millis(500));

        let s = Settings { timer_interval: f64::NEG_INFINITY, ..Settings::default() };
        assert_eq!(s.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn fan_captions_fall_back_to_ids() {
        let s = Settings::default();
        assert_eq!(s.fan_caption(0), "Cooling Fan");
        assert_eq!(s.fan_caption(1), "Pi Fan");
        assert_eq!(s.fan_caption(2), "Fan 2");

        let mut s = Settings::default();
        s.fan_captions = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        assert!(matches!(load_settings(f.path()), Err(PiPowerError::JsonParse(_))));
    }

    #[test]
    #[serial]
    fn env_var_overrides_default_path() {
        env::set_var(crate::constants::env::CONFIG, "/tmp/pipower-test.json");
        assert_eq!(settings_path(None), PathBuf::from("/tmp/pipower-test.json"));
        assert_eq!(settings_path(Some(Path::new("/x.json"))), PathBuf::from("/x.json"));
        env::remove_var(crate::constants::env::CONFIG);
    }

    #[test]
    fn hardware_paths_under_root() {
        let hw = HardwarePaths::under(Path::new("/tmp/root"));
        assert_eq!(hw.w1_devices, PathBuf::from("/tmp/root/bus/w1/devices"));
        assert_eq!(hw.pwm_chip, PathBuf::from("/tmp/root/class/pwm/pwmchip0"));
    }
}
