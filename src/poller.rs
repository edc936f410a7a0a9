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

//! Polling and publishing scheduler
//!
//! Two timers drive the hat: a fast one refreshes the cached snapshot that
//! queries are answered from, a slow one reads a fresh snapshot and
//! publishes it as an event. Commands arrive on demand from the socket
//! server. All three paths call the same [`PowerHat`].
//!
//! Hat calls block (sysfs I/O, the fan kick), so every tick runs on the
//! blocking pool. A tick that fires while the previous poll of the same
//! timer is still running is skipped and logged, so a hung probe cannot
//! pile up work.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::{load_settings, Settings};
use crate::constants::timing::MAX_CONSECUTIVE_ERRORS;
use crate::data::Snapshot;
use crate::error::{PiPowerError, Result};
use crate::events::{BroadcastSink, Event, EventSink, TracingSink};
use crate::hat::{Command, PowerHat};

/// Shared state behind the timers and the socket server
pub struct HatService {
    hat: Arc<PowerHat>,
    settings: RwLock<Settings>,
    settings_path: Option<PathBuf>,
    cache: RwLock<Option<Snapshot>>,
    sink: Arc<dyn EventSink>,
    broadcast: Arc<BroadcastSink>,
    reload_notify: Notify,
}

impl HatService {
    pub fn new(hat: Arc<PowerHat>, settings: Settings) -> Self {
        Self {
            hat,
            settings: RwLock::new(settings),
            settings_path: None,
            cache: RwLock::new(None),
            sink: Arc::new(TracingSink),
            broadcast: Arc::new(BroadcastSink::new()),
            reload_notify: Notify::new(),
        }
    }

    /// File that `ReloadConfig` re-reads
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn hat(&self) -> &PowerHat {
        &self.hat
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn cached(&self) -> Option<Snapshot> {
        self.cache.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.broadcast.subscribe()
    }

    fn store(&self, snapshot: &Snapshot) {
        *self.cache.write() = Some(snapshot.clone());
    }

    fn emit(&self, snapshot: Snapshot) {
        let event = Event::snapshot(snapshot);
        if let Err(e) = self.sink.publish(&event) {
            warn!("Event publish failed: {}", e);
        }
        // Broadcast never fails
        let _ = self.broadcast.publish(&event);
    }

    /// Fast timer body: read and cache
    pub fn refresh_cache(&self) -> Result<Snapshot> {
        let snapshot = self.hat.read_all(&self.settings())?;
        self.store(&snapshot);
        Ok(snapshot)
    }

    /// Slow timer body: read, cache and publish
    pub fn publish(&self) -> Result<()> {
        let snapshot = self.refresh_cache()?;
        self.emit(snapshot);
        Ok(())
    }

    /// Latest cached snapshot, or a fresh read when nothing is cached yet
    pub fn snapshot(&self) -> Result<Snapshot> {
        match self.cached() {
            Some(s) => Ok(s),
            None => self.refresh_cache(),
        }
    }

    pub fn discover_sensors(&self) -> Vec<String> {
        self.hat.discover_sensors()
    }

    /// Apply a command and publish the refreshed snapshot. A rejected
    /// command still refreshes and publishes current state before the
    /// error is returned.
    pub fn execute(&self, command: &Command) -> Result<Snapshot> {
        let settings = self.settings();
        match self.hat.apply_command(command, &settings) {
            Ok(snapshot) => {
                info!(?command, "Command applied");
                self.store(&snapshot);
                self.emit(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                if e.is_validation() {
                    debug!(?command, "Command rejected: {}", e);
                } else {
                    warn!(?command, "Command failed: {}", e);
                }
                match self.hat.read_all(&settings) {
                    Ok(snapshot) => {
                        self.store(&snapshot);
                        self.emit(snapshot);
                    }
                    Err(read_err) => debug!("Refresh after failed command skipped: {}", read_err),
                }
                Err(e)
            }
        }
    }

    /// Re-read the settings file, re-apply GPIO modes and wake the timers so
    /// new intervals take effect. `pwmFrequency` only applies at startup.
    pub fn reload_settings(&self) -> Result<()> {
        let path = self
            .settings_path
            .as_deref()
            .ok_or_else(|| PiPowerError::config("no settings file to reload"))?;
        let fresh = load_settings(path)?;
        self.hat.reconfigure_gpio(&fresh.gpio_options)?;
        {
            let mut current = self.settings.write();
            if current.pwm_frequency != fresh.pwm_frequency {
                info!(
                    from = current.pwm_frequency,
                    to = fresh.pwm_frequency,
                    "PWM frequency change takes effect on restart"
                );
            }
            *current = fresh;
        }
        self.reload_notify.notify_waiters();
        info!(path = %path.display(), "Settings reloaded");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Fast: refresh the query cache
    Cache,
    /// Slow: publish an event
    Publish,
}

impl Timer {
    pub fn interval(self, settings: &Settings) -> Duration {
        match self {
            Timer::Cache => settings.poll_interval(),
            Timer::Publish => settings.event_interval(),
        }
    }

    fn run(self, service: &HatService) -> Result<()> {
        match self {
            Timer::Cache => service.refresh_cache().map(|_| ()),
            Timer::Publish => service.publish(),
        }
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timer::Cache => f.write_str("cache"),
            Timer::Publish => f.write_str("publish"),
        }
    }
}

/// Per-timer bookkeeping: one poll in flight at most, and error counting
#[derive(Default)]
pub struct TimerState {
    in_flight: AtomicBool,
    consecutive_errors: AtomicU32,
}

/// Clears the in-flight flag when the poll ends, even by panic
pub struct InFlight(Arc<TimerState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl TimerState {
    /// `None` while the previous poll is still running
    pub fn try_begin(self: &Arc<Self>) -> Option<InFlight> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(InFlight(Arc::clone(self)))
    }

    fn record(&self, timer: Timer, result: Result<()>) {
        match result {
            Ok(()) => {
                let prior = self.consecutive_errors.swap(0, Ordering::SeqCst);
                if prior > 0 {
                    debug!(timer = %timer, "Poll recovered after {} errors", prior);
                }
            }
            Err(e) => {
                let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if count == 1 || count % MAX_CONSECUTIVE_ERRORS == 0 {
                    error!(timer = %timer, "Poll failed (count: {}): {}", count, e);
                }
            }
        }
    }
}

/// Run one timer until `shutdown` flips or its sender is dropped
pub async fn run_timer(
    service: Arc<HatService>,
    timer: Timer,
    mut shutdown: watch::Receiver<bool>,
) {
    let state = Arc::new(TimerState::default());
    info!(timer = %timer, interval = ?timer.interval(&service.settings()), "Timer starting");

    loop {
        let interval = timer.interval(&service.settings());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = service.reload_notify.notified() => {
                debug!(timer = %timer, "Timer woken by settings reload");
                continue;
            }
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(guard) = state.try_begin() else {
            warn!(timer = %timer, hat = %service.hat.state(), "Poll stalled, skipping tick");
            continue;
        };
        let svc = Arc::clone(&service);
        let st = Arc::clone(&state);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            st.record(timer, timer.run(&svc));
        });
    }

    info!(timer = %timer, "Timer stopped");
}
