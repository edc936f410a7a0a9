//! sysfs PWM channels (`/sys/class/pwm/pwmchip0/pwmN`)

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{board, fan, pwm};
use crate::error::{PiPowerError, Result};
use crate::hw::sysfs;
use crate::hw::PwmOutput;

pub struct SysfsPwm {
    chip: PathBuf,
    periods_ns: [Option<u64>; board::FAN_COUNT],
}

impl SysfsPwm {
    pub fn new(chip: &Path) -> Self {
        Self { chip: chip.to_path_buf(), periods_ns: [None; board::FAN_COUNT] }
    }

    fn channel_dir(&self, channel: usize) -> PathBuf {
        self.chip.join(format!("pwm{}", channel))
    }

    fn check_channel(channel: usize) -> Result<()> {
        if channel >= board::FAN_COUNT {
            return Err(PiPowerError::actuation(
                format!("PWM channel {}", channel),
                "no such channel",
            ));
        }
        Ok(())
    }
}

/// Period in nanoseconds for a frequency in Hz
pub fn period_ns(frequency_hz: u32) -> u64 {
    pwm::NANOS_PER_SEC / u64::from(frequency_hz.max(pwm::MIN_FREQUENCY_HZ))
}

/// Duty cycle in nanoseconds for a percentage of the period
pub fn duty_ns(period_ns: u64, percent: u8) -> u64 {
    period_ns * u64::from(percent.min(fan::MAX_SPEED_PERCENT)) / 100
}

impl PwmOutput for SysfsPwm {
    fn start(&mut self, channel: usize, frequency_hz: u32) -> Result<()> {
        Self::check_channel(channel)?;
        let dir = self.channel_dir(channel);
        if !dir.exists() {
            sysfs::write_attr(&self.chip.join("export"), &channel.to_string())?;
        }
        let period = period_ns(frequency_hz);
        // duty_cycle must never exceed period, so zero it first
        sysfs::write_attr(&dir.join("duty_cycle"), "0")?;
        sysfs::write_attr(&dir.join("period"), &period.to_string())?;
        sysfs::write_attr(&dir.join("enable"), "1")?;
        self.periods_ns[channel] = Some(period);
        debug!(channel, frequency_hz, period_ns = period, "Started PWM channel");
        Ok(())
    }

    fn set_duty(&mut self, channel: usize, percent: u8) -> Result<()> {
        Self::check_channel(channel)?;
        let period = self.periods_ns[channel].ok_or_else(|| {
            PiPowerError::actuation(format!("PWM channel {}", channel), "channel not started")
        })?;
        sysfs::write_attr(
            &self.channel_dir(channel).join("duty_cycle"),
            &duty_ns(period, percent).to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn computes_period_and_duty() {
        assert_eq!(period_ns(100), 10_000_000);
        assert_eq!(period_ns(25_000), 40_000);
        assert_eq!(duty_ns(10_000_000, 30), 3_000_000);
        assert_eq!(duty_ns(10_000_000, 100), 10_000_000);
    }

    #[test]
    fn starts_channel_and_writes_duty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::create_dir_all(dir.path().join("pwm1")).unwrap();

        let mut pwm = SysfsPwm::new(dir.path());
        assert!(pwm.set_duty(1, 50).is_err());
        pwm.start(1, 100).unwrap();
        let ch = dir.path().join("pwm1");
        assert_eq!(fs::read_to_string(ch.join("period")).unwrap(), "10000000");
        assert_eq!(fs::read_to_string(ch.join("enable")).unwrap(), "1");
        assert_eq!(fs::read_to_string(ch.join("duty_cycle")).unwrap(), "0");

        pwm.set_duty(1, 25).unwrap();
        assert_eq!(fs::read_to_string(ch.join("duty_cycle")).unwrap(), "2500000");
        assert!(pwm.start(2, 100).is_err());
    }
}
