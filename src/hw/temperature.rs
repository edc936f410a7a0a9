//! 1-Wire temperature bus
//!
//! DS18B20 probes appear under `/sys/bus/w1/devices/28-*`. Each exposes a
//! `w1_slave` file with two lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` once a conversion has completed and the CRC
//! matched; the second carries the reading in millidegrees Celsius. A probe
//! that keeps answering `NO` is retried a bounded number of times and then
//! reported not ready, so one stuck probe cannot hang a poll cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace};

use crate::constants::{board, rounding, temperature};
use crate::data::round_to;
use crate::error::{PiPowerError, Result};
use crate::hw::TemperatureSource;

fn millidegree_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"t=(-?\d+)").expect("static regex"))
}

/// Parse a `w1_slave` dump. `Ok(None)` means the conversion is not ready yet.
pub fn parse_w1_slave(sensor_id: &str, contents: &str) -> Result<Option<f64>> {
    let mut lines = contents.lines();
    let status = lines
        .next()
        .ok_or_else(|| PiPowerError::sensor_unavailable(sensor_id, "empty w1_slave"))?;
    if !status.trim_end().ends_with(temperature::READY_MARKER) {
        return Ok(None);
    }
    let data = lines
        .next()
        .ok_or_else(|| PiPowerError::sensor_unavailable(sensor_id, "missing data line"))?;
    let caps = millidegree_field()
        .captures(data)
        .ok_or_else(|| PiPowerError::sensor_unavailable(sensor_id, "no t= field in data line"))?;
    let millidegrees: i64 = caps[1]
        .parse()
        .map_err(|_| PiPowerError::sensor_unavailable(sensor_id, "t= field out of range"))?;
    let celsius = millidegrees as f64 / temperature::MILLIDEGREE_DIVISOR;
    Ok(Some(round_to(celsius, rounding::TEMPERATURE_DECIMALS)))
}

/// sysfs reader for the probes on one bus master
pub struct W1TemperatureBus {
    root: PathBuf,
    retries: u32,
    retry_delay: Duration,
}

impl W1TemperatureBus {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            retries: temperature::READY_RETRIES,
            retry_delay: temperature::READY_RETRY_DELAY,
        }
    }

    /// Override the not-ready retry policy
    pub fn with_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    fn slave_path(&self, sensor_id: &str) -> Result<PathBuf> {
        if sensor_id.is_empty() || sensor_id.contains('/') || sensor_id.contains("..") {
            return Err(PiPowerError::sensor_unavailable(sensor_id, "invalid sensor id"));
        }
        Ok(self.root.join(sensor_id).join("w1_slave"))
    }
}

impl TemperatureSource for W1TemperatureBus {
    fn discover(&self) -> Vec<String> {
        let mut ids: Vec<String> = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| name.starts_with(board::W1_FAMILY_PREFIX))
                .collect(),
            Err(e) => {
                debug!("No 1-Wire bus at {:?}: {}", self.root, e);
                Vec::new()
            }
        };
        ids.sort();
        let mut out = Vec::with_capacity(ids.len() + 1);
        out.push(String::new());
        out.extend(ids);
        out
    }

    fn read_celsius(&mut self, sensor_id: &str) -> Result<f64> {
        let path = self.slave_path(sensor_id)?;
        wait_until_ready(sensor_id, self.retries, self.retry_delay, || {
            fs::read_to_string(&path)
                .map_err(|e| PiPowerError::sensor_unavailable(sensor_id, e.to_string()))
        })
    }
}

/// Re-read a probe until its frame carries the ready marker, at most
/// `retries` times with `delay` between reads
fn wait_until_ready<F>(sensor_id: &str, retries: u32, delay: Duration, mut read: F) -> Result<f64>
where
    F: FnMut() -> Result<String>,
{
    for attempt in 1..=retries {
        if let Some(celsius) = parse_w1_slave(sensor_id, &read()?)? {
            trace!(sensor = sensor_id, attempt, celsius, "Read temperature");
            return Ok(celsius);
        }
        trace!(sensor = sensor_id, attempt, "Conversion not ready");
        if attempt < retries {
            thread::sleep(delay);
        }
    }
    Err(PiPowerError::SensorNotReady { sensor_id: sensor_id.to_string(), attempts: retries })
}
