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

//! Constants and configuration values for PiPower
//!
//! Paths, board layout, timings and limits live here so the device modules
//! never carry magic numbers of their own.

use std::time::Duration;

/// System paths used by the real hardware backend
pub mod paths {
    /// 1-Wire bus devices (DS18B20 temperature probes)
    pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

    /// hwmon class directory (INA219 power monitor via the ina2xx driver)
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// Industrial I/O devices (light sensor)
    pub const IIO_DEVICES: &str = "/sys/bus/iio/devices";

    /// Legacy sysfs GPIO interface
    pub const GPIO_BASE: &str = "/sys/class/gpio";

    /// Hardware PWM chip driving the two fan channels
    pub const PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";

    /// System-wide settings file
    pub const SYSTEM_SETTINGS: &str = "/etc/pipower/settings.json";

    /// Settings file name inside the user config directory
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Config directory name under XDG config home
    pub const CONFIG_DIR_NAME: &str = "pipower";

    /// Default Unix socket for the query/command server
    pub const SOCKET: &str = "/run/pipower.sock";

    /// Default JSON-lines event log
    pub const EVENT_LOG: &str = "/var/lib/pipower/events.jsonl";

    /// Fallback event log when the default location is not writable
    pub const EVENT_LOG_FALLBACK: &str = "/tmp/pipower_events.jsonl";

    /// systemd journal socket, used to decide on journald logging
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";
}

/// Environment variables
pub mod env {
    /// Overrides the settings file location
    pub const CONFIG: &str = "PIPOWER_CONFIG";

    /// Log filter (trace, debug, info, warn, error)
    pub const LOG: &str = "PIPOWER_LOG";
}

/// Fixed board layout
pub mod board {
    /// Addressable PWM fan channels
    pub const FAN_COUNT: usize = 2;

    /// BCM pins wired to the PWM fan channels (PWM0 / PWM1)
    pub const FAN_PINS: [u32; FAN_COUNT] = [18, 19];

    /// Id of the synthetic always-on fan appended to every snapshot
    pub const ALWAYS_ON_FAN_ID: u32 = 2;

    /// Fan entries in a snapshot: the PWM fans plus the always-on one
    pub const FAN_VIEW_COUNT: usize = FAN_COUNT + 1;

    /// Lowest usable BCM pin on the 40-pin header
    pub const GPIO_MIN_PIN: u32 = 2;

    /// Highest usable BCM pin on the 40-pin header
    pub const GPIO_MAX_PIN: u32 = 27;

    /// Upper bound on configured temperature slots
    pub const MAX_TEMPERATURE_SENSORS: usize = 8;

    /// 1-Wire family prefix of DS18B20 probes
    pub const W1_FAMILY_PREFIX: &str = "28-";

    /// hwmon chip names accepted as the power monitor
    pub const POWER_MONITOR_CHIPS: &[&str] = &["ina219", "ina226", "ina3221"];

    /// IIO device names accepted as the light sensor
    pub const LIGHT_SENSOR_DEVICES: &[&str] =
        &["tsl2561", "tsl2563", "bh1750", "veml7700", "tsl4531"];
}

/// Temperature bus timing
pub mod temperature {
    use super::Duration;

    /// Delay between "not ready" retries of a w1_slave read
    pub const READY_RETRY_DELAY: Duration = Duration::from_millis(200);

    /// Bounded number of reads before a probe is reported not ready
    pub const READY_RETRIES: u32 = 10;

    /// w1_slave status line ready marker
    pub const READY_MARKER: &str = "YES";

    /// Raw readings are millidegrees Celsius
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;
}

/// Fan control
pub mod fan {
    use super::Duration;

    /// Requested speeds below this kick the fan to full duty first
    pub const KICK_THRESHOLD_PERCENT: u8 = 50;

    /// Duty applied during the kick
    pub const KICK_DUTY_PERCENT: u8 = 100;

    /// How long the kick is held before dropping to the target
    pub const KICK_SETTLE: Duration = Duration::from_millis(1000);

    pub const MAX_SPEED_PERCENT: u8 = 100;
}

/// PWM limits
pub mod pwm {
    pub const DEFAULT_FREQUENCY_HZ: u32 = 100;
    pub const MIN_FREQUENCY_HZ: u32 = 1;
    pub const MAX_FREQUENCY_HZ: u32 = 100_000;

    /// Nanoseconds per second, for period computation
    pub const NANOS_PER_SEC: u64 = 1_000_000_000;
}

/// Output contract rounding
pub mod rounding {
    pub const TEMPERATURE_DECIMALS: i32 = 1;
    pub const VOLTAGE_DECIMALS: i32 = 1;
    pub const CURRENT_DECIMALS: i32 = 1;
    pub const POWER_DECIMALS: i32 = 2;
}

/// Light sensor
pub mod light {
    /// Reported light level when no sensor is present
    pub const ABSENT_SENTINEL: f64 = -1.0;
}

/// Poll scheduling
pub mod timing {
    use super::Duration;

    /// Default fast (cache refresh) interval in seconds
    pub const DEFAULT_TIMER_INTERVAL_SECS: f64 = 10.0;

    /// Default slow (event publish) interval in seconds
    pub const DEFAULT_EVENT_TIMER_INTERVAL_SECS: f64 = 30.0;

    /// Shortest accepted timer interval in seconds
    pub const MIN_INTERVAL_SECS: f64 = 0.5;

    /// Longest accepted timer interval in seconds (one day)
    pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

    /// Log the first failure, then every Nth consecutive failure
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

    /// Pause after loading kernel modules so w1 devices can appear
    pub const MODULE_SETTLE: Duration = Duration::from_millis(500);
}

/// Event publishing
pub mod events {
    /// Identifier of the origin module attached to every event
    pub const PLUGIN_ID: &str = "pipower";

    /// Topic of periodic and post-command snapshots
    pub const SNAPSHOT_TOPIC: &str = "snapshot";

    /// Buffered events per subscriber before it starts lagging
    pub const BROADCAST_CAPACITY: usize = 32;
}

/// Query/command server limits
pub mod server {
    use super::Duration;

    pub const MAX_CONNECTIONS: usize = 16;
    pub const MAX_MESSAGE_SIZE: usize = 4 * 1024;
    pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const SOCKET_MODE: u32 = 0o660;
}

/// Settings limits
pub mod limits {
    pub const MAX_CAPTION_LEN: usize = 64;
    pub const MAX_SENSOR_ID_LEN: usize = 32;
}
