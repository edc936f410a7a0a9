//! Fan controller
//!
//! Two PWM channels, one per fan. Small DC fans will not start from rest at
//! a low duty cycle, so a fan that is being brought up into a low target is
//! first kicked at full duty for a short settle time:
//!
//! ```text
//! enable && target < 50% && previous effective speed < target
//!     => 100% duty, wait KICK_SETTLE, target duty
//! ```
//!
//! The commanded state is what the snapshot reports. A PWM write that fails
//! is logged and the state is recorded anyway.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::{board, fan};
use crate::data::{FanState, FanView};
use crate::error::{PiPowerError, Result};
use crate::hw::PwmOutput;

pub struct FanController {
    pwm: Box<dyn PwmOutput>,
    states: [FanState; board::FAN_COUNT],
    kick_settle: Duration,
}

impl FanController {
    pub fn new(pwm: Box<dyn PwmOutput>) -> Self {
        Self {
            pwm,
            states: [FanState::default(); board::FAN_COUNT],
            kick_settle: fan::KICK_SETTLE,
        }
    }

    /// Override how long the full-duty kick is held
    pub fn set_kick_delay(&mut self, delay: Duration) {
        self.kick_settle = delay;
    }

    /// Start both channels at 0% duty
    pub fn start(&mut self, frequency_hz: u32) -> Result<()> {
        for channel in 0..board::FAN_COUNT {
            self.pwm.start(channel, frequency_hz).map_err(|e| {
                PiPowerError::HardwareInitFailed(format!("PWM channel {}: {}", channel, e))
            })?;
        }
        info!(frequency_hz, channels = board::FAN_COUNT, "Fan PWM started");
        Ok(())
    }

    fn index(fan_id: u32) -> Result<usize> {
        let idx = fan_id as usize;
        if idx >= board::FAN_COUNT {
            return Err(PiPowerError::InvalidFan(fan_id));
        }
        Ok(idx)
    }

    fn drive(&mut self, idx: usize, percent: u8) {
        if let Err(e) = self.pwm.set_duty(idx, percent) {
            let err = PiPowerError::actuation(format!("fan {}", idx), e.to_string());
            warn!("{}", err);
        }
    }

    /// Set on/off and speed together
    pub fn set_fan(&mut self, fan_id: u32, enabled: bool, speed_percent: i64) -> Result<FanState> {
        let idx = Self::index(fan_id)?;
        if !(0..=i64::from(fan::MAX_SPEED_PERCENT)).contains(&speed_percent) {
            return Err(PiPowerError::InvalidFanSpeed(speed_percent));
        }
        let speed = speed_percent as u8;
        let previous = self.states[idx].effective_speed_percent();

        if enabled {
            if speed < fan::KICK_THRESHOLD_PERCENT && previous < speed {
                debug!(fan = fan_id, from = previous, to = speed, "Kicking fan to full duty");
                self.drive(idx, fan::KICK_DUTY_PERCENT);
                thread::sleep(self.kick_settle);
            }
            self.drive(idx, speed);
        } else {
            self.drive(idx, 0);
        }

        let state = FanState { enabled, commanded_speed_percent: speed };
        self.states[idx] = state;
        debug!(fan = fan_id, enabled, speed, "Fan updated");
        Ok(state)
    }

    /// Switch a fan on or off, keeping its stored speed
    pub fn set_fan_state(&mut self, fan_id: u32, enabled: bool) -> Result<FanState> {
        let speed = self.state(fan_id)?.commanded_speed_percent;
        self.set_fan(fan_id, enabled, i64::from(speed))
    }

    /// Change a fan's speed, keeping its on/off state
    pub fn set_fan_speed(&mut self, fan_id: u32, speed_percent: i64) -> Result<FanState> {
        let enabled = self.state(fan_id)?.enabled;
        self.set_fan(fan_id, enabled, speed_percent)
    }

    pub fn state(&self, fan_id: u32) -> Result<FanState> {
        Ok(self.states[Self::index(fan_id)?])
    }

    /// Both real fans followed by the always-on entry, named by `caption`
    pub fn views(&self, caption: impl Fn(u32) -> String) -> Vec<FanView> {
        let mut views: Vec<FanView> = self
            .states
            .iter()
            .enumerate()
            .map(|(i, s)| FanView::from_state(i as u32, caption(i as u32), s))
            .collect();
        views.push(FanView::always_on(caption(board::ALWAYS_ON_FAN_ID)));
        views
    }

    /// Drive every channel to 0% without touching the stored state
    pub fn stop_all(&mut self) {
        for idx in 0..board::FAN_COUNT {
            self.drive(idx, 0);
        }
    }
}
