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

//! Push-event publishing
//!
//! Every published snapshot is wrapped in an [`Event`] tagged with the
//! origin identifier and topic, then handed to an [`EventSink`]. The daemon
//! fans events out to a JSON-lines file, to socket subscribers and to the
//! log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::events;
use crate::data::{now_ms, Snapshot};
use crate::error::{PiPowerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub plugin: String,
    pub topic: String,
    pub ts_ms: u64,
    pub data: Snapshot,
}

impl Event {
    pub fn snapshot(data: Snapshot) -> Self {
        Self {
            plugin: events::PLUGIN_ID.to_string(),
            topic: events::SNAPSHOT_TOPIC.to_string(),
            ts_ms: now_ms(),
            data,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event) -> Result<()>;
}

/// Appends one JSON object per line
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_append(path)
            .map_err(|e| PiPowerError::FileWrite { path: path.to_path_buf(), source: e })?;
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(file) })
    }

    /// Open `primary`, or `fallback` when the primary location is not writable
    pub fn open_with_fallback(primary: &Path, fallback: &Path) -> Result<Self> {
        match Self::open(primary) {
            Ok(sink) => Ok(sink),
            Err(e) => {
                warn!(
                    "Event log {} unavailable ({}), using {}",
                    primary.display(),
                    e,
                    fallback.display()
                );
                Self::open(fallback)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesSink {
    fn publish(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)
            .map_err(|e| PiPowerError::FileWrite { path: self.path.clone(), source: e })
    }
}

/// Feeds `Subscribe` connections; lagging subscribers drop old events
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<Event>>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(events::BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &Event) -> Result<()> {
        // No subscribers is not an error
        let _ = self.tx.send(Arc::new(event.clone()));
        Ok(())
    }
}

pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &Event) -> Result<()> {
        let present = event.data.temperatures.iter().filter(|t| t.value.is_some()).count();
        debug!(
            topic = %event.topic,
            temperatures = present,
            power_w = event.data.power.map(|p| p.power_watts),
            light = event.data.light_level,
            "Published snapshot"
        );
        Ok(())
    }
}

/// Publishes to every inner sink; one failing sink does not stop the others
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &Event) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                warn!("Event sink failed: {}", e);
            }
        }
        Ok(())
    }
}
