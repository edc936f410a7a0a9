//! Optional ambient light sensor (IIO)

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::constants::{board, light};
use crate::error::{PiPowerError, Result};
use crate::hw::sysfs;
use crate::hw::LightSource;

/// Light sensor exposed through the Industrial I/O subsystem. Drivers that
/// compute lux publish `in_illuminance_input`; raw-only drivers publish
/// `in_illuminance_raw` with an optional `in_illuminance_scale`.
pub struct IioLightSensor {
    root: PathBuf,
    device: Option<PathBuf>,
}

impl IioLightSensor {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf(), device: None }
    }
}

fn read_lux_from(dir: &Path) -> Result<f64> {
    let processed = dir.join("in_illuminance_input");
    if processed.exists() {
        return sysfs::read_number(&processed);
    }
    let raw: f64 = sysfs::read_number(&dir.join("in_illuminance_raw"))?;
    let scale_path = dir.join("in_illuminance_scale");
    let scale = if scale_path.exists() { sysfs::read_number(&scale_path)? } else { 1.0 };
    Ok(raw * scale)
}

impl LightSource for IioLightSensor {
    fn probe(&mut self) -> Result<()> {
        let (dir, name) = sysfs::find_device_by_name(&self.root, board::LIGHT_SENSOR_DEVICES)
            .ok_or_else(|| {
                PiPowerError::LightSensorUnavailable(format!(
                    "no light sensor under {}",
                    self.root.display()
                ))
            })?;
        read_lux_from(&dir).map_err(|e| PiPowerError::LightSensorUnavailable(e.to_string()))?;
        info!(device = %name, path = %dir.display(), "Found light sensor");
        self.device = Some(dir);
        Ok(())
    }

    fn read_lux(&mut self) -> Result<f64> {
        let dir = self
            .device
            .as_ref()
            .ok_or_else(|| PiPowerError::LightSensorUnavailable("not probed".into()))?;
        read_lux_from(dir).map_err(|e| PiPowerError::LightSensorUnavailable(e.to_string()))
    }
}

/// Presence is decided once; an absent sensor reads as -1 forever after
pub struct LightSensor {
    source: Box<dyn LightSource>,
    present: bool,
}

impl LightSensor {
    pub fn new(source: Box<dyn LightSource>) -> Self {
        Self { source, present: false }
    }

    pub fn initialize(&mut self) -> bool {
        self.present = match self.source.probe() {
            Ok(()) => true,
            Err(e) => {
                info!("No light sensor, reporting {}: {}", light::ABSENT_SENTINEL, e);
                false
            }
        };
        self.present
    }

    pub fn read_level(&mut self) -> f64 {
        if !self.present {
            return light::ABSENT_SENTINEL;
        }
        match self.source.read_lux() {
            Ok(lux) => lux,
            Err(e) => {
                debug!("Light sensor read failed: {}", e);
                light::ABSENT_SENTINEL
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MockLightSource;
    use std::fs;

    fn iio_device(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("iio:device0");
        fs::create_dir_all(&dev).unwrap();
        for (name, contents) in files {
            fs::write(dev.join(name), contents).unwrap();
        }
        dir
    }

    #[test]
    fn reads_processed_lux() {
        let dir = iio_device(&[("name", "tsl2561\n"), ("in_illuminance_input", "137\n")]);
        let mut s = IioLightSensor::new(dir.path());
        s.probe().unwrap();
        assert_eq!(s.read_lux().unwrap(), 137.0);
    }

    #[test]
    fn scales_raw_lux() {
        let dir = iio_device(&[
            ("name", "veml7700\n"),
            ("in_illuminance_raw", "200\n"),
            ("in_illuminance_scale", "0.5\n"),
        ]);
        let mut s = IioLightSensor::new(dir.path());
        s.probe().unwrap();
        assert_eq!(s.read_lux().unwrap(), 100.0);
    }

    #[test]
    fn unknown_device_is_absent() {
        let dir = iio_device(&[("name", "ads1015\n")]);
        let mut s = IioLightSensor::new(dir.path());
        assert!(matches!(s.probe(), Err(PiPowerError::LightSensorUnavailable(_))));
    }

    #[test]
    fn absent_sensor_reports_sentinel_without_access() {
        let mut source = MockLightSource::new();
        source
            .expect_probe()
            .times(1)
            .returning(|| Err(PiPowerError::LightSensorUnavailable("none".into())));
        source.expect_read_lux().never();

        let mut sensor = LightSensor::new(Box::new(source));
        assert!(!sensor.initialize());
        assert_eq!(sensor.read_level(), -1.0);
        assert_eq!(sensor.read_level(), -1.0);
    }
}
